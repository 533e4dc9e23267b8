use crate::database::{model::booking::BookingRow, ConnectionPool};
use async_trait::async_trait;
use derive_new::new;
use kernel::model::{
    booking::{
        event::{CreateBooking, UpdateBookingRoom},
        Booking,
    },
    id::{BookingId, RoomId, UserId},
};
use kernel::repository::booking::BookingRepository;
use shared::error::{AppError, AppResult};

#[derive(new)]
pub struct BookingRepositoryImpl {
    db: ConnectionPool,
}

#[async_trait]
impl BookingRepository for BookingRepositoryImpl {
    // ユーザーの現在の予約を部屋情報ごと取得する
    async fn find_by_user_id(&self, user_id: UserId) -> AppResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(
            r#"
                SELECT
                b.booking_id,
                b.user_id,
                r.room_id,
                r.hotel_id,
                r.room_name,
                r.capacity,
                r.created_at,
                r.updated_at
                FROM bookings AS b
                INNER JOIN rooms AS r ON b.room_id = r.room_id
                WHERE b.user_id = $1
                ;
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.db.inner_ref())
        .await
        .map_err(AppError::SpecificOperationError)?;

        Ok(row.map(Booking::from))
    }

    // 予約操作を行う
    async fn create(&self, event: CreateBooking) -> AppResult<BookingId> {
        let mut tx = self.db.begin().await?;

        // 事前のチェックとして、指定の部屋 ID をもつ部屋が存在するかを調べる。
        // 空き枠の有無（403）とは区別して、存在しない部屋は 404 で返すため
        {
            let room_exists = sqlx::query_scalar::<_, RoomId>(
                r#"
                SELECT room_id
                FROM rooms
                WHERE room_id = $1
                "#,
            )
            .bind(event.room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::SpecificOperationError)?;

            if room_exists.is_none() {
                return Err(AppError::EntityNotFound(format!(
                    "部屋（{}）が見つかりませんでした。",
                    event.room_id
                )));
            }
        }

        // 空き枠があるときだけ capacity を 1 減らす。
        // WHERE 句付きの加減算により、同じ部屋への同時予約があっても
        // 定員を超えて予約されることはない
        let res = sqlx::query(
            r#"
                UPDATE rooms
                SET capacity = capacity - 1
                WHERE room_id = $1 AND capacity >= 1
            "#,
        )
        .bind(event.room_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::SpecificOperationError)?;

        if res.rows_affected() < 1 {
            return Err(AppError::ForbiddenOperation(format!(
                "部屋（{}）に空きがありません。",
                event.room_id
            )));
        }

        // 予約処理を行う、すなわち bookings テーブルにレコードを追加する。
        // ユーザーが既に予約を持っている場合は user_id の UNIQUE 制約に
        // 違反するので、403 に読み替える
        let booking_id = sqlx::query_scalar::<_, BookingId>(
            r#"
                INSERT INTO bookings (user_id, room_id)
                VALUES ($1, $2)
                RETURNING booking_id
                ;
            "#,
        )
        .bind(event.user_id)
        .bind(event.room_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::ForbiddenOperation(
                format!("ユーザー（{}）は既に予約を持っています。", event.user_id),
            ),
            _ => AppError::SpecificOperationError(e),
        })?;

        tx.commit().await.map_err(AppError::TransactionError)?;

        Ok(booking_id)
    }

    // 予約の部屋の差し替え操作を行う
    async fn update_room(&self, event: UpdateBookingRoom) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        // 事前のチェックとして、以下を調べる。
        // - 指定の予約 ID をもつ予約が存在し、リクエストしたユーザーのものか
        // - 差し替え先の部屋が存在し、空き枠があるか
        //
        // 上記の両方が Yes だった場合、このブロック以降の処理に進む
        let old_room_id: RoomId;
        {
            //
            // ① 予約の存在確認 ＋ 所有者チェック
            //    予約行をロックし、同じ予約への同時操作を直列化する
            //
            let booking_row = sqlx::query_as::<_, (UserId, RoomId)>(
                r#"
                SELECT user_id, room_id
                FROM bookings
                WHERE booking_id = $1
                FOR UPDATE
                "#,
            )
            .bind(event.booking_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::SpecificOperationError)?;

            let Some((owner_id, room_id)) = booking_row else {
                return Err(AppError::ForbiddenOperation(format!(
                    "変更対象の予約（{}）がありません。",
                    event.booking_id
                )));
            };

            if owner_id != event.requested_user {
                return Err(AppError::ForbiddenOperation(format!(
                    "予約（{}）は他のユーザーのものです。",
                    event.booking_id
                )));
            }

            old_room_id = room_id;

            //
            // ② 差し替え先の部屋の存在確認 ＋ 空き枠チェック
            //    こちらも行をロックしてから capacity を見る
            //
            let capacity = sqlx::query_scalar::<_, i32>(
                r#"
                SELECT capacity
                FROM rooms
                WHERE room_id = $1
                FOR UPDATE
                "#,
            )
            .bind(event.room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::SpecificOperationError)?;

            let Some(capacity) = capacity else {
                return Err(AppError::EntityNotFound(format!(
                    "部屋（{}）が見つかりませんでした。",
                    event.room_id
                )));
            };

            if capacity < 1 {
                return Err(AppError::ForbiddenOperation(format!(
                    "部屋（{}）に空きがありません。",
                    event.room_id
                )));
            }
        }

        // 旧い部屋の枠を解放してから、新しい部屋の枠を確保する。
        // 同一トランザクション内なので、差し替え元と差し替え先が同じ部屋でも
        // 途中の過不足が外から見えることはない
        sqlx::query(
            r#"
                UPDATE rooms
                SET capacity = capacity + 1
                WHERE room_id = $1
            "#,
        )
        .bind(old_room_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::SpecificOperationError)?;

        sqlx::query(
            r#"
                UPDATE rooms
                SET capacity = capacity - 1
                WHERE room_id = $1
            "#,
        )
        .bind(event.room_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::SpecificOperationError)?;

        // 予約レコードの部屋を差し替える
        let res = sqlx::query(
            r#"
                UPDATE bookings
                SET room_id = $1
                WHERE booking_id = $2
            "#,
        )
        .bind(event.room_id)
        .bind(event.booking_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::SpecificOperationError)?;

        if res.rows_affected() < 1 {
            return Err(AppError::NoRowsAffectedError(
                "No booking record has been updated".into(),
            ));
        }

        tx.commit().await.map_err(AppError::TransactionError)?;

        Ok(())
    }
}
