use kernel::model::{
    id::{HotelId, RoomId},
    room::Room,
};

#[derive(sqlx::FromRow)]
pub struct RoomRow {
    pub room_id: RoomId,
    pub hotel_id: HotelId,
    pub room_name: String,
    pub capacity: i32,
}

impl From<RoomRow> for Room {
    fn from(value: RoomRow) -> Self {
        let RoomRow {
            room_id,
            hotel_id,
            room_name,
            capacity,
        } = value;
        Room {
            room_id,
            hotel_id,
            room_name,
            capacity,
        }
    }
}
