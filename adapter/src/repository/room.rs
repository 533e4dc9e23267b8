use crate::database::{model::room::RoomRow, ConnectionPool};
use async_trait::async_trait;
use derive_new::new;
use kernel::model::{id::RoomId, room::Room};
use kernel::repository::room::RoomRepository;
use shared::error::{AppError, AppResult};

#[derive(new)]
pub struct RoomRepositoryImpl {
    db: ConnectionPool,
}

#[async_trait]
impl RoomRepository for RoomRepositoryImpl {
    async fn find_by_id(&self, room_id: RoomId) -> AppResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(
            r#"
                SELECT
                room_id,
                hotel_id,
                room_name,
                capacity
                FROM rooms
                WHERE room_id = $1
                ;
            "#,
        )
        .bind(room_id)
        .fetch_optional(self.db.inner_ref())
        .await
        .map_err(AppError::SpecificOperationError)?;

        Ok(row.map(Room::from))
    }
}
