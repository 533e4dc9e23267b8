use crate::model::{id::RoomId, room::Room};
use async_trait::async_trait;
use shared::error::AppResult;

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_by_id(&self, room_id: RoomId) -> AppResult<Option<Room>>;
}
