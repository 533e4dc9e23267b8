use crate::{
    extractor::AuthorizedUser,
    model::booking::{
        BookingResponse, CreateBookingRequest, CreatedBookingResponse, UpdateBookingRequest,
    },
};
use axum::{
    extract::{Path, State},
    Json,
};
use garde::Validate;
use kernel::model::{
    booking::event::{CreateBooking, UpdateBookingRoom},
    id::{BookingId, RoomId, UserId},
};
use registry::AppRegistry;
use shared::error::{AppError, AppResult};

// チケットによる権利の検証を行う。
// 404 系（参加登録・チケットの不存在）を 403 系（権利不足）より
// 先に判定する。この順序により、有効なチケットを持たないユーザーに
// 部屋の空き状況を教えてしまうことがない
async fn verify_ticket_entitlement(registry: &AppRegistry, user_id: UserId) -> AppResult<()> {
    let enrollment = registry
        .enrollment_repository()
        .find_by_user_id(user_id)
        .await?
        .ok_or_else(|| AppError::EntityNotFound("参加登録が見つかりませんでした。".into()))?;

    let ticket = registry
        .ticket_repository()
        .find_by_enrollment_id(enrollment.enrollment_id)
        .await?
        .ok_or_else(|| AppError::EntityNotFound("チケットが見つかりませんでした。".into()))?;

    if !ticket.permits_hotel_booking() {
        return Err(AppError::ForbiddenOperation(
            "このチケットでは宿泊予約ができません。".into(),
        ));
    }

    Ok(())
}

// 予約作成時の事前検証。権利の検証に加えて、
// 対象の部屋の存在（404）と空き枠の有無（403）を確認する
async fn verify_booking_eligibility(
    registry: &AppRegistry,
    user_id: UserId,
    room_id: RoomId,
) -> AppResult<()> {
    verify_ticket_entitlement(registry, user_id).await?;

    let room = registry
        .room_repository()
        .find_by_id(room_id)
        .await?
        .ok_or_else(|| {
            AppError::EntityNotFound(format!("部屋（{room_id}）が見つかりませんでした。"))
        })?;

    if !room.has_free_slot() {
        return Err(AppError::ForbiddenOperation(format!(
            "部屋（{room_id}）に空きがありません。"
        )));
    }

    Ok(())
}

pub async fn get_booking(
    user: AuthorizedUser,
    State(registry): State<AppRegistry>,
) -> AppResult<Json<BookingResponse>> {
    registry
        .booking_repository()
        .find_by_user_id(user.id())
        .await
        .and_then(|booking| match booking {
            Some(booking) => Ok(Json(booking.into())),
            None => Err(AppError::EntityNotFound(
                "予約が見つかりませんでした。".into(),
            )),
        })
}

pub async fn post_booking(
    user: AuthorizedUser,
    State(registry): State<AppRegistry>,
    Json(req): Json<CreateBookingRequest>,
) -> AppResult<Json<CreatedBookingResponse>> {
    req.validate(&())?;

    let room_id = RoomId::new(req.room_id);

    verify_booking_eligibility(&registry, user.id(), room_id).await?;

    // 空き枠の確保と予約レコードの作成はリポジトリ側の
    // 単一トランザクション内で行われる
    let booking_id = registry
        .booking_repository()
        .create(CreateBooking::new(user.id(), room_id))
        .await?;

    Ok(Json(CreatedBookingResponse { booking_id }))
}

pub async fn put_booking(
    user: AuthorizedUser,
    Path(booking_id): Path<BookingId>,
    State(registry): State<AppRegistry>,
    Json(req): Json<UpdateBookingRequest>,
) -> AppResult<Json<CreatedBookingResponse>> {
    req.validate(&())?;

    let new_room_id = RoomId::new(req.room_id);

    // 差し替え元の予約がない場合は 404 ではなく 403 を返す。
    // ユーザー自体は認証・検証済みで、差し替える対象が無いだけのため
    if registry
        .booking_repository()
        .find_by_user_id(user.id())
        .await?
        .is_none()
    {
        return Err(AppError::ForbiddenOperation(
            "変更対象の予約がありません。".into(),
        ));
    }

    // 予約作成時の権利が引き続き有効であることを確認する
    verify_ticket_entitlement(&registry, user.id()).await?;

    // 差し替え先の部屋の存在（404）と空き枠（403）を確認する
    let room = registry
        .room_repository()
        .find_by_id(new_room_id)
        .await?
        .ok_or_else(|| {
            AppError::EntityNotFound(format!("部屋（{new_room_id}）が見つかりませんでした。"))
        })?;

    if !room.has_free_slot() {
        return Err(AppError::ForbiddenOperation(format!(
            "部屋（{new_room_id}）に空きがありません。"
        )));
    }

    // 予約の所有者チェックと部屋の枠の付け替えはリポジトリ側の
    // 単一トランザクション内で行われる
    registry
        .booking_repository()
        .update_room(UpdateBookingRoom::new(booking_id, user.id(), new_room_id))
        .await?;

    Ok(Json(CreatedBookingResponse { booking_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use kernel::model::{
        auth::AccessToken,
        booking::{Booking, BookingRoom},
        enrollment::Enrollment,
        id::{EnrollmentId, HotelId, TicketId, TicketTypeId},
        room::Room,
        ticket::{Ticket, TicketStatus, TicketType},
    };
    use kernel::repository::{
        auth::AuthRepository, booking::BookingRepository, enrollment::EnrollmentRepository,
        health::HealthCheckRepository, room::RoomRepository, ticket::TicketRepository,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy)]
    struct BookingRecord {
        booking_id: BookingId,
        user_id: UserId,
        room_id: RoomId,
    }

    // rooms と bookings を 1 つの Mutex 付きストアにまとめた
    // インメモリ実装。ロックの取得順は常に rooms → bookings とする
    #[derive(Default)]
    struct InMemoryStore {
        rooms: Mutex<HashMap<RoomId, Room>>,
        bookings: Mutex<Vec<BookingRecord>>,
        booking_seq: AtomicI64,
    }

    impl InMemoryStore {
        fn add_room(&self, room_id: i64, capacity: i32) {
            self.rooms.lock().unwrap().insert(
                RoomId::new(room_id),
                Room {
                    room_id: RoomId::new(room_id),
                    hotel_id: HotelId::new(1),
                    room_name: format!("Test Room {room_id}"),
                    capacity,
                },
            );
        }

        fn seed_booking(&self, booking_id: i64, user_id: i64, room_id: i64) {
            self.bookings.lock().unwrap().push(BookingRecord {
                booking_id: BookingId::new(booking_id),
                user_id: UserId::new(user_id),
                room_id: RoomId::new(room_id),
            });
        }

        fn capacity_of(&self, room_id: i64) -> i32 {
            self.rooms.lock().unwrap()[&RoomId::new(room_id)].capacity
        }

        fn room_timestamps() -> (DateTime<Utc>, DateTime<Utc>) {
            let at = DateTime::parse_from_rfc3339("2025-09-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            (at, at)
        }
    }

    struct FakeHealthCheckRepository;

    #[async_trait]
    impl HealthCheckRepository for FakeHealthCheckRepository {
        async fn check_db(&self) -> bool {
            true
        }
    }

    struct FakeAuthRepository;

    #[async_trait]
    impl AuthRepository for FakeAuthRepository {
        async fn fetch_user_id_from_token(
            &self,
            _access_token: &AccessToken,
        ) -> AppResult<Option<UserId>> {
            Ok(None)
        }
    }

    struct FakeEnrollmentRepository {
        enrolled: bool,
    }

    #[async_trait]
    impl EnrollmentRepository for FakeEnrollmentRepository {
        async fn find_by_user_id(&self, user_id: UserId) -> AppResult<Option<Enrollment>> {
            Ok(self.enrolled.then(|| Enrollment {
                enrollment_id: EnrollmentId::new(user_id.raw()),
                user_id,
                name: "Test User".into(),
            }))
        }
    }

    struct FakeTicketRepository {
        // (status, is_remote, includes_hotel)。None はチケット未購入
        ticket: Option<(TicketStatus, bool, bool)>,
    }

    #[async_trait]
    impl TicketRepository for FakeTicketRepository {
        async fn find_by_enrollment_id(
            &self,
            enrollment_id: EnrollmentId,
        ) -> AppResult<Option<Ticket>> {
            Ok(self
                .ticket
                .map(|(status, is_remote, includes_hotel)| Ticket {
                    ticket_id: TicketId::new(1),
                    enrollment_id,
                    status,
                    ticket_type: TicketType {
                        ticket_type_id: TicketTypeId::new(1),
                        name: "Test TicketType".into(),
                        price: 25000,
                        is_remote,
                        includes_hotel,
                    },
                }))
        }
    }

    struct FakeRoomRepository {
        store: Arc<InMemoryStore>,
    }

    #[async_trait]
    impl RoomRepository for FakeRoomRepository {
        async fn find_by_id(&self, room_id: RoomId) -> AppResult<Option<Room>> {
            Ok(self.store.rooms.lock().unwrap().get(&room_id).cloned())
        }
    }

    // SQL 実装と同じエラー種別を返すインメモリ実装。
    // 空き枠の確保・解放と予約レコードの操作はロック内で一括して行う
    struct FakeBookingRepository {
        store: Arc<InMemoryStore>,
    }

    #[async_trait]
    impl BookingRepository for FakeBookingRepository {
        async fn find_by_user_id(&self, user_id: UserId) -> AppResult<Option<Booking>> {
            let rooms = self.store.rooms.lock().unwrap();
            let bookings = self.store.bookings.lock().unwrap();
            let (created_at, updated_at) = InMemoryStore::room_timestamps();

            Ok(bookings.iter().find(|b| b.user_id == user_id).map(|b| {
                let room = &rooms[&b.room_id];
                Booking {
                    booking_id: b.booking_id,
                    user_id: b.user_id,
                    room: BookingRoom {
                        room_id: room.room_id,
                        hotel_id: room.hotel_id,
                        room_name: room.room_name.clone(),
                        capacity: room.capacity,
                        created_at,
                        updated_at,
                    },
                }
            }))
        }

        async fn create(&self, event: CreateBooking) -> AppResult<BookingId> {
            let mut rooms = self.store.rooms.lock().unwrap();
            let mut bookings = self.store.bookings.lock().unwrap();

            let Some(room) = rooms.get_mut(&event.room_id) else {
                return Err(AppError::EntityNotFound(format!(
                    "部屋（{}）が見つかりませんでした。",
                    event.room_id
                )));
            };

            if room.capacity < 1 {
                return Err(AppError::ForbiddenOperation(format!(
                    "部屋（{}）に空きがありません。",
                    event.room_id
                )));
            }

            if bookings.iter().any(|b| b.user_id == event.user_id) {
                return Err(AppError::ForbiddenOperation(format!(
                    "ユーザー（{}）は既に予約を持っています。",
                    event.user_id
                )));
            }

            room.capacity -= 1;

            let booking_id =
                BookingId::new(self.store.booking_seq.fetch_add(1, Ordering::SeqCst) + 1);
            bookings.push(BookingRecord {
                booking_id,
                user_id: event.user_id,
                room_id: event.room_id,
            });

            Ok(booking_id)
        }

        async fn update_room(&self, event: UpdateBookingRoom) -> AppResult<()> {
            let mut rooms = self.store.rooms.lock().unwrap();
            let mut bookings = self.store.bookings.lock().unwrap();

            let Some(record) = bookings.iter_mut().find(|b| b.booking_id == event.booking_id)
            else {
                return Err(AppError::ForbiddenOperation(format!(
                    "変更対象の予約（{}）がありません。",
                    event.booking_id
                )));
            };

            if record.user_id != event.requested_user {
                return Err(AppError::ForbiddenOperation(format!(
                    "予約（{}）は他のユーザーのものです。",
                    event.booking_id
                )));
            }

            if !rooms.contains_key(&event.room_id) {
                return Err(AppError::EntityNotFound(format!(
                    "部屋（{}）が見つかりませんでした。",
                    event.room_id
                )));
            }

            if rooms[&event.room_id].capacity < 1 {
                return Err(AppError::ForbiddenOperation(format!(
                    "部屋（{}）に空きがありません。",
                    event.room_id
                )));
            }

            let old_room_id = record.room_id;
            rooms.get_mut(&old_room_id).unwrap().capacity += 1;
            rooms.get_mut(&event.room_id).unwrap().capacity -= 1;
            record.room_id = event.room_id;

            Ok(())
        }
    }

    const PAID_TICKET: Option<(TicketStatus, bool, bool)> = Some((TicketStatus::Paid, false, true));

    struct TestApp {
        store: Arc<InMemoryStore>,
        registry: AppRegistry,
    }

    fn test_app(enrolled: bool, ticket: Option<(TicketStatus, bool, bool)>) -> TestApp {
        let store = Arc::new(InMemoryStore::default());
        let registry = AppRegistry::from_parts(
            Arc::new(FakeHealthCheckRepository),
            Arc::new(FakeEnrollmentRepository { enrolled }),
            Arc::new(FakeTicketRepository { ticket }),
            Arc::new(FakeRoomRepository {
                store: store.clone(),
            }),
            Arc::new(FakeBookingRepository {
                store: store.clone(),
            }),
            Arc::new(FakeAuthRepository),
        );
        TestApp { store, registry }
    }

    fn authorized_user(user_id: i64) -> AuthorizedUser {
        AuthorizedUser {
            access_token: AccessToken("test-token".into()),
            user_id: UserId::new(user_id),
        }
    }

    #[tokio::test]
    async fn get_booking_returns_booking_with_room() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 3);
        app.store.seed_booking(10, 7, 1);

        let Json(body) = get_booking(authorized_user(7), State(app.registry.clone()))
            .await
            .unwrap();

        assert_eq!(body.booking_id, BookingId::new(10));
        assert_eq!(body.room.room_id, RoomId::new(1));
        assert_eq!(body.room.capacity, 3);
    }

    #[tokio::test]
    async fn get_booking_without_booking_is_not_found() {
        let app = test_app(true, PAID_TICKET);

        let err = get_booking(authorized_user(7), State(app.registry.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn post_booking_without_enrollment_is_not_found() {
        let app = test_app(false, PAID_TICKET);
        app.store.add_room(1, 1);

        let err = post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn post_booking_without_ticket_is_not_found() {
        let app = test_app(true, None);
        app.store.add_room(1, 1);

        let err = post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn post_booking_with_ineligible_ticket_is_forbidden() {
        // 未払い・リモート参加・宿泊なしはいずれも 403
        let tickets = [
            (TicketStatus::Reserved, false, true),
            (TicketStatus::Paid, true, true),
            (TicketStatus::Paid, false, false),
        ];

        for ticket in tickets {
            let app = test_app(true, Some(ticket));
            app.store.add_room(1, 1);

            let err = post_booking(
                authorized_user(7),
                State(app.registry.clone()),
                Json(CreateBookingRequest { room_id: 1 }),
            )
            .await
            .unwrap_err();

            assert!(matches!(err, AppError::ForbiddenOperation(_)));
            assert_eq!(app.store.capacity_of(1), 1);
        }
    }

    #[tokio::test]
    async fn post_booking_to_missing_room_is_not_found() {
        let app = test_app(true, PAID_TICKET);

        let err = post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 999 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn post_booking_to_full_room_is_forbidden_and_keeps_capacity() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 0);

        let err = post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::ForbiddenOperation(_)));
        assert_eq!(app.store.capacity_of(1), 0);
    }

    #[tokio::test]
    async fn post_booking_succeeds_and_decrements_capacity() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 1);

        let Json(created) = post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap();

        assert!(created.booking_id.raw() >= 1);
        assert_eq!(app.store.capacity_of(1), 0);

        // 作成後の読み出しでは部屋情報も返ってくる
        let Json(body) = get_booking(authorized_user(7), State(app.registry.clone()))
            .await
            .unwrap();
        assert_eq!(body.booking_id, created.booking_id);
        assert_eq!(body.room.room_id, RoomId::new(1));
    }

    #[tokio::test]
    async fn post_booking_twice_is_forbidden() {
        // ユーザーが同時に持てる予約は 1 件だけ
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 2);

        post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap();

        let err = post_booking(
            authorized_user(7),
            State(app.registry.clone()),
            Json(CreateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::ForbiddenOperation(_)));
        assert_eq!(app.store.capacity_of(1), 1);
    }

    #[tokio::test]
    async fn put_booking_swaps_rooms() {
        let app = test_app(true, PAID_TICKET);
        // ユーザーが部屋 1 の最後の枠を使っている状態
        app.store.add_room(1, 0);
        app.store.add_room(2, 1);
        app.store.seed_booking(10, 7, 1);

        let Json(updated) = put_booking(
            authorized_user(7),
            Path(BookingId::new(10)),
            State(app.registry.clone()),
            Json(UpdateBookingRequest { room_id: 2 }),
        )
        .await
        .unwrap();

        assert_eq!(updated.booking_id, BookingId::new(10));
        assert_eq!(app.store.capacity_of(1), 1);
        assert_eq!(app.store.capacity_of(2), 0);

        let Json(body) = get_booking(authorized_user(7), State(app.registry.clone()))
            .await
            .unwrap();
        assert_eq!(body.room.room_id, RoomId::new(2));
    }

    #[tokio::test]
    async fn put_booking_to_same_room_is_net_zero() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 1);
        app.store.seed_booking(10, 7, 1);

        put_booking(
            authorized_user(7),
            Path(BookingId::new(10)),
            State(app.registry.clone()),
            Json(UpdateBookingRequest { room_id: 1 }),
        )
        .await
        .unwrap();

        assert_eq!(app.store.capacity_of(1), 1);
    }

    #[tokio::test]
    async fn put_booking_without_existing_booking_is_forbidden() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(2, 1);

        let err = put_booking(
            authorized_user(7),
            Path(BookingId::new(10)),
            State(app.registry.clone()),
            Json(UpdateBookingRequest { room_id: 2 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::ForbiddenOperation(_)));
    }

    #[tokio::test]
    async fn put_booking_to_missing_room_is_not_found() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 0);
        app.store.seed_booking(10, 7, 1);

        let err = put_booking(
            authorized_user(7),
            Path(BookingId::new(10)),
            State(app.registry.clone()),
            Json(UpdateBookingRequest { room_id: 999 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn put_booking_to_full_room_is_forbidden() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 0);
        app.store.add_room(2, 0);
        app.store.seed_booking(10, 7, 1);

        let err = put_booking(
            authorized_user(7),
            Path(BookingId::new(10)),
            State(app.registry.clone()),
            Json(UpdateBookingRequest { room_id: 2 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::ForbiddenOperation(_)));
        assert_eq!(app.store.capacity_of(1), 0);
        assert_eq!(app.store.capacity_of(2), 0);
    }

    #[tokio::test]
    async fn put_booking_on_other_users_booking_is_forbidden() {
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 0);
        app.store.add_room(2, 1);
        app.store.add_room(3, 0);
        // 予約 10 は別のユーザー（8）のもの。ユーザー 7 は予約 11 を持つ
        app.store.seed_booking(10, 8, 1);
        app.store.seed_booking(11, 7, 3);

        let err = put_booking(
            authorized_user(7),
            Path(BookingId::new(10)),
            State(app.registry.clone()),
            Json(UpdateBookingRequest { room_id: 2 }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::ForbiddenOperation(_)));
        // 予約 10 は部屋 1 のまま
        let Json(body) = get_booking(authorized_user(8), State(app.registry.clone()))
            .await
            .unwrap();
        assert_eq!(body.room.room_id, RoomId::new(1));
    }

    #[tokio::test]
    async fn concurrent_post_bookings_never_oversell() {
        // 空き枠 3 の部屋への 4 件の同時予約。
        // 3 件だけが成功し、残る 1 件は 403 で、capacity は 0 で止まる
        let app = test_app(true, PAID_TICKET);
        app.store.add_room(1, 3);

        let requests = (1..=4).map(|user_id| {
            post_booking(
                authorized_user(user_id),
                State(app.registry.clone()),
                Json(CreateBookingRequest { room_id: 1 }),
            )
        });
        let results = futures::future::join_all(requests).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let forbidden = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::ForbiddenOperation(_))))
            .count();

        assert_eq!(succeeded, 3);
        assert_eq!(forbidden, 1);
        assert_eq!(app.store.capacity_of(1), 0);
    }
}
