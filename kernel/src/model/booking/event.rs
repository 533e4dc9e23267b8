use crate::model::id::{BookingId, RoomId, UserId};
use derive_new::new;

#[derive(new)]
pub struct CreateBooking {
    pub user_id: UserId,
    pub room_id: RoomId,
}

#[derive(new)]
pub struct UpdateBookingRoom {
    pub booking_id: BookingId,
    // 予約の所有者であることの確認に使う
    pub requested_user: UserId,
    pub room_id: RoomId,
}
