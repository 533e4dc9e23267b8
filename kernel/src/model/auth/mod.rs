// Bearer トークン。発行・失効は外部の認証コンポーネントが行い、
// 本サービスはユーザー ID の解決にのみ使う。
pub struct AccessToken(pub String);
