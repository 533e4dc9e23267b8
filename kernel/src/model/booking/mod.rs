use crate::model::id::{BookingId, HotelId, RoomId, UserId};
use chrono::{DateTime, Utc};

pub mod event;

// ユーザーと部屋の紐付け。ユーザーは同時に 1 件だけ予約を持てる
#[derive(Debug)]
pub struct Booking {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub room: BookingRoom,
}

#[derive(Debug)]
pub struct BookingRoom {
    pub room_id: RoomId,
    pub hotel_id: HotelId,
    pub room_name: String,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
