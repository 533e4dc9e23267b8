use kernel::model::{
    id::{EnrollmentId, TicketId, TicketTypeId},
    ticket::{Ticket, TicketStatus, TicketType},
};

// チケットを ticket_types と INNER JOIN して取得する際に使う型
#[derive(sqlx::FromRow)]
pub struct TicketRow {
    pub ticket_id: TicketId,
    pub enrollment_id: EnrollmentId,
    pub status: TicketStatus,
    pub ticket_type_id: TicketTypeId,
    pub ticket_type_name: String,
    pub price: i32,
    pub is_remote: bool,
    pub includes_hotel: bool,
}

impl From<TicketRow> for Ticket {
    fn from(value: TicketRow) -> Self {
        let TicketRow {
            ticket_id,
            enrollment_id,
            status,
            ticket_type_id,
            ticket_type_name,
            price,
            is_remote,
            includes_hotel,
        } = value;
        Ticket {
            ticket_id,
            enrollment_id,
            status,
            ticket_type: TicketType {
                ticket_type_id,
                name: ticket_type_name,
                price,
                is_remote,
                includes_hotel,
            },
        }
    }
}
