use axum::{
    routing::{get, post, put},
    Router,
};
use registry::AppRegistry;

use crate::handler::booking::{get_booking, post_booking, put_booking};

pub fn build_booking_routers() -> Router<AppRegistry> {
    // 部屋の差し替えは、既存クライアントとの互換のため
    // /booking/booking/:booking_id に生やしている
    let booking_routers = Router::new()
        .route("/", get(get_booking))
        .route("/", post(post_booking))
        .route("/booking/:booking_id", put(put_booking));

    Router::new().nest("/booking", booking_routers)
}
