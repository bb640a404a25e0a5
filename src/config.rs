use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    /// セッションプロバイダー（外部）の Admin API URL
    pub session_provider_url: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    pub smtp_from_address: Option<String>,

    // マジックリンク設定
    #[serde(default)]
    pub magic_link_url_base: Option<String>,
    #[serde(default = "default_magic_link_token_ttl_secs")]
    pub magic_link_token_ttl_secs: i64,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示される）
    pub totp_issuer: String,
    /// TOTPシークレット暗号化用のAES-256キー（Base64エンコード、32バイト）
    pub encryption_key: SecretBox<String>,

    // Cookie 設定
    /// 検証マーカー／保留チャレンジCookie封印用シークレット（Base64、32バイト）
    pub cookie_seal_secret: SecretBox<String>,
    /// Secure属性を付与するか（ローカル開発では false）
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
    /// OAuth保留チャレンジの有効期間（秒）
    #[serde(default = "default_pending_oauth_ttl_secs")]
    pub pending_oauth_ttl_secs: i64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_MAGIC_LINK_TOKEN_TTL_SECS: i64 = 600;
const DEFAULT_PENDING_OAUTH_TTL_SECS: i64 = 600;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_magic_link_token_ttl_secs() -> i64 {
    DEFAULT_MAGIC_LINK_TOKEN_TTL_SECS
}

fn default_pending_oauth_ttl_secs() -> i64 {
    DEFAULT_PENDING_OAUTH_TTL_SECS
}

fn default_secure_cookies() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
