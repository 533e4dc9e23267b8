use std::sync::Arc;

use adapter::database::ConnectionPool;
use adapter::redis::RedisClient;
use adapter::repository::auth::AuthRepositoryImpl;
use adapter::repository::booking::BookingRepositoryImpl;
use adapter::repository::enrollment::EnrollmentRepositoryImpl;
use adapter::repository::health::HealthCheckRepositoryImpl;
use adapter::repository::room::RoomRepositoryImpl;
use adapter::repository::ticket::TicketRepositoryImpl;
use kernel::repository::auth::AuthRepository;
use kernel::repository::booking::BookingRepository;
use kernel::repository::enrollment::EnrollmentRepository;
use kernel::repository::health::HealthCheckRepository;
use kernel::repository::room::RoomRepository;
use kernel::repository::ticket::TicketRepository;

#[derive(Clone)]
pub struct AppRegistry {
    health_check_repository: Arc<dyn HealthCheckRepository>,
    enrollment_repository: Arc<dyn EnrollmentRepository>,
    ticket_repository: Arc<dyn TicketRepository>,
    room_repository: Arc<dyn RoomRepository>,
    booking_repository: Arc<dyn BookingRepository>,
    auth_repository: Arc<dyn AuthRepository>,
}

impl AppRegistry {
    pub fn new(pool: ConnectionPool, redis_client: Arc<RedisClient>) -> Self {
        let health_check_repository = Arc::new(HealthCheckRepositoryImpl::new(pool.clone()));
        let enrollment_repository = Arc::new(EnrollmentRepositoryImpl::new(pool.clone()));
        let ticket_repository = Arc::new(TicketRepositoryImpl::new(pool.clone()));
        let room_repository = Arc::new(RoomRepositoryImpl::new(pool.clone()));
        let booking_repository = Arc::new(BookingRepositoryImpl::new(pool.clone()));
        let auth_repository = Arc::new(AuthRepositoryImpl::new(redis_client.clone()));
        Self {
            health_check_repository,
            enrollment_repository,
            ticket_repository,
            room_repository,
            booking_repository,
            auth_repository,
        }
    }

    // リポジトリ実装を差し替えて組み立てるためのコンストラクタ。
    // ハンドラのテストでインメモリ実装を注入する際に使う
    pub fn from_parts(
        health_check_repository: Arc<dyn HealthCheckRepository>,
        enrollment_repository: Arc<dyn EnrollmentRepository>,
        ticket_repository: Arc<dyn TicketRepository>,
        room_repository: Arc<dyn RoomRepository>,
        booking_repository: Arc<dyn BookingRepository>,
        auth_repository: Arc<dyn AuthRepository>,
    ) -> Self {
        Self {
            health_check_repository,
            enrollment_repository,
            ticket_repository,
            room_repository,
            booking_repository,
            auth_repository,
        }
    }

    pub fn health_check_repository(&self) -> Arc<dyn HealthCheckRepository> {
        self.health_check_repository.clone()
    }

    pub fn enrollment_repository(&self) -> Arc<dyn EnrollmentRepository> {
        self.enrollment_repository.clone()
    }

    pub fn ticket_repository(&self) -> Arc<dyn TicketRepository> {
        self.ticket_repository.clone()
    }

    pub fn room_repository(&self) -> Arc<dyn RoomRepository> {
        self.room_repository.clone()
    }

    pub fn booking_repository(&self) -> Arc<dyn BookingRepository> {
        self.booking_repository.clone()
    }

    pub fn auth_repository(&self) -> Arc<dyn AuthRepository> {
        self.auth_repository.clone()
    }
}
