use crate::model::id::{HotelId, RoomId};

// capacity は空き枠の数を表す。0 以上で、増減はストレージ層の
// アトミックな加減算でのみ行う
#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: RoomId,
    pub hotel_id: HotelId,
    pub room_name: String,
    pub capacity: i32,
}

impl Room {
    pub fn has_free_slot(&self) -> bool {
        self.capacity >= 1
    }
}
