use kernel::model::{
    booking::{Booking, BookingRoom},
    id::{BookingId, HotelId, RoomId, UserId},
};
use sqlx::types::chrono::{DateTime, Utc};

// ユーザーの予約を rooms と INNER JOIN して取得する際に使う型
#[derive(sqlx::FromRow)]
pub struct BookingRow {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub hotel_id: HotelId,
    pub room_name: String,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(value: BookingRow) -> Self {
        let BookingRow {
            booking_id,
            user_id,
            room_id,
            hotel_id,
            room_name,
            capacity,
            created_at,
            updated_at,
        } = value;
        Booking {
            booking_id,
            user_id,
            room: BookingRoom {
                room_id,
                hotel_id,
                room_name,
                capacity,
                created_at,
                updated_at,
            },
        }
    }
}
