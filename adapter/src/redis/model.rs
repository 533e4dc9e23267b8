use kernel::model::auth::AccessToken;

pub trait RedisKey: Send + Sync {
    fn inner(&self) -> String;
}

// アクセストークン → ユーザー ID の対応を引くためのキー
pub struct AuthorizationKey(String);

impl RedisKey for AuthorizationKey {
    fn inner(&self) -> String {
        format!("auth:{}", self.0)
    }
}

impl From<&AccessToken> for AuthorizationKey {
    fn from(token: &AccessToken) -> Self {
        Self(token.0.clone())
    }
}
