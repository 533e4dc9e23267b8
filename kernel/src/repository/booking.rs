use crate::model::{
    booking::{
        event::{CreateBooking, UpdateBookingRoom},
        Booking,
    },
    id::{BookingId, UserId},
};
use async_trait::async_trait;
use shared::error::AppResult;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    // ユーザーの現在の予約を部屋情報ごと取得する
    async fn find_by_user_id(&self, user_id: UserId) -> AppResult<Option<Booking>>;
    // 予約操作を行う。部屋の空き枠の確保と予約レコードの作成は
    // 単一トランザクション内で行われる
    async fn create(&self, event: CreateBooking) -> AppResult<BookingId>;
    // 予約の部屋を差し替える。旧い部屋の枠の解放・新しい部屋の枠の確保・
    // 予約レコードの更新は単一トランザクション内で行われる
    async fn update_room(&self, event: UpdateBookingRoom) -> AppResult<()>;
}
