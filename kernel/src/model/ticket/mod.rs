use crate::model::id::{EnrollmentId, TicketId, TicketTypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "UPPERCASE")]
pub enum TicketStatus {
    Reserved,
    Paid,
}

#[derive(Debug, Clone)]
pub struct TicketType {
    pub ticket_type_id: TicketTypeId,
    pub name: String,
    pub price: i32,
    pub is_remote: bool,
    pub includes_hotel: bool,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub enrollment_id: EnrollmentId,
    pub status: TicketStatus,
    pub ticket_type: TicketType,
}

impl Ticket {
    // 宿泊予約が許可されるチケットか判定する。
    // 支払い済み、かつリモート参加ではなく、宿泊付きであること
    pub fn permits_hotel_booking(&self) -> bool {
        self.status == TicketStatus::Paid
            && !self.ticket_type.is_remote
            && self.ticket_type.includes_hotel
    }
}
