use crate::redis::{model::AuthorizationKey, RedisClient};
use async_trait::async_trait;
use derive_new::new;
use kernel::model::{auth::AccessToken, id::UserId};
use kernel::repository::auth::AuthRepository;
use shared::error::{AppError, AppResult};
use std::sync::Arc;

#[derive(new)]
pub struct AuthRepositoryImpl {
    kv: Arc<RedisClient>,
}

#[async_trait]
impl AuthRepository for AuthRepositoryImpl {
    // Redis に保存されたアクセストークンからユーザー ID を引く。
    // トークンの発行・失効は外部の認証コンポーネントが行う
    async fn fetch_user_id_from_token(
        &self,
        access_token: &AccessToken,
    ) -> AppResult<Option<UserId>> {
        let key = AuthorizationKey::from(access_token);
        let value = self.kv.get(&key).await?;

        value
            .map(|v| {
                v.parse::<i64>().map(UserId::new).map_err(|e| {
                    AppError::ConversionEntityError(format!(
                        "ユーザー ID への変換に失敗しました: {e}"
                    ))
                })
            })
            .transpose()
    }
}
