use std::sync::Arc;

use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{
    MagicLinkTokenRepository, TrustedDeviceRepository, TwoFactorCredentialRepository,
    UserRepository,
};
use crate::services::{
    AuthService, EmailService, MagicLinkService, RequirementResolver, SecondFactorVerifier,
    SessionClient, SessionCookies, TotpService,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL コネクションプール
    pub db_pool: PgPool,
    /// セッションプロバイダー Admin API クライアント
    pub session_client: SessionClient,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// ユーザーリポジトリ
    pub user_repo: UserRepository,
    /// 2FAクレデンシャルリポジトリ
    pub credential_repo: TwoFactorCredentialRepository,
    /// 信頼済みデバイスリポジトリ
    pub trusted_device_repo: TrustedDeviceRepository,
    /// 認証サービス
    pub auth_service: AuthService,
    /// TOTPサービス
    pub totp_service: TotpService,
    /// 第二要素検証器
    pub verifier: SecondFactorVerifier,
    /// 2FA要求リゾルバー
    pub resolver: RequirementResolver,
    /// 封印Cookieサービス
    pub session_cookies: SessionCookies,
    /// マジックリンクサービス
    pub magic_link_service: MagicLinkService,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(
        db_pool: PgPool,
        session_client: SessionClient,
        config: Config,
    ) -> Result<Self, AppError> {
        let config = Arc::new(config);
        let user_repo = UserRepository::new(db_pool.clone());
        let credential_repo = TwoFactorCredentialRepository::new(db_pool.clone());
        let trusted_device_repo = TrustedDeviceRepository::new(db_pool.clone());
        let magic_link_token_repo = MagicLinkTokenRepository::new(db_pool.clone());

        let auth_service = AuthService::new(user_repo.clone());
        let email_service = EmailService::new(config.clone());
        let totp_service = TotpService::new(
            config.totp_issuer.clone(),
            config.encryption_key.expose_secret(),
        )?;
        let verifier = SecondFactorVerifier::new(credential_repo.clone(), totp_service.clone());
        let resolver = RequirementResolver::new(
            user_repo.clone(),
            credential_repo.clone(),
            trusted_device_repo.clone(),
        );
        let session_cookies = SessionCookies::new(
            config.cookie_seal_secret.expose_secret(),
            config.secure_cookies,
            config.pending_oauth_ttl_secs,
        )?;
        let magic_link_service = MagicLinkService::new(
            user_repo.clone(),
            magic_link_token_repo,
            email_service,
            config.clone(),
        );

        Ok(Self {
            db_pool,
            session_client,
            config,
            user_repo,
            credential_repo,
            trusted_device_repo,
            auth_service,
            totp_service,
            verifier,
            resolver,
            session_cookies,
            magic_link_service,
        })
    }
}
