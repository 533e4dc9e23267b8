use crate::model::id::{EnrollmentId, UserId};

// ユーザーごとに 1 件の参加登録。作成は外部で行われ、ここでは読み取り専用
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub enrollment_id: EnrollmentId,
    pub user_id: UserId,
    pub name: String,
}
