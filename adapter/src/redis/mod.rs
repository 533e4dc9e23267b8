use redis::AsyncCommands;
use shared::{config::RedisConfig, error::AppResult};

pub mod model;

use self::model::RedisKey;

pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub fn new(config: &RedisConfig) -> AppResult<Self> {
        let client = redis::Client::open(format!("redis://{}:{}", config.host, config.port))?;
        Ok(Self { client })
    }

    pub async fn get(&self, key: &impl RedisKey) -> AppResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key.inner()).await?;
        Ok(value)
    }

    // 運用ツールや外部の認証コンポーネントからトークンを投入するための口
    pub async fn set_ex(&self, key: &impl RedisKey, value: String, ttl: u64) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key.inner(), value, ttl).await?;
        Ok(())
    }
}
