use chrono::{DateTime, Utc};
use garde::Validate;
use kernel::model::{
    booking::{Booking, BookingRoom},
    id::{BookingId, HotelId, RoomId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    #[garde(range(min = 1))]
    pub room_id: i64,
}

// 部屋の差し替え用の型
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    #[garde(range(min = 1))]
    pub room_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBookingResponse {
    pub booking_id: BookingId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub booking_id: BookingId,
    pub room: BookingRoomResponse,
}

impl From<Booking> for BookingResponse {
    fn from(value: Booking) -> Self {
        let Booking {
            booking_id,
            user_id: _,
            room,
        } = value;
        Self {
            booking_id,
            room: room.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRoomResponse {
    pub room_id: RoomId,
    pub hotel_id: HotelId,
    pub room_name: String,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BookingRoom> for BookingRoomResponse {
    fn from(value: BookingRoom) -> Self {
        let BookingRoom {
            room_id,
            hotel_id,
            room_name,
            capacity,
            created_at,
            updated_at,
        } = value;
        Self {
            room_id,
            hotel_id,
            room_name,
            capacity,
            created_at,
            updated_at,
        }
    }
}
