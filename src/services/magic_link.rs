use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{MagicLinkTokenRepository, UserRepository};
use crate::services::EmailService;

/// マジックリンクサービス
#[derive(Clone)]
pub struct MagicLinkService {
    user_repo: UserRepository,
    token_repo: MagicLinkTokenRepository,
    email_service: EmailService,
    config: Arc<Config>,
}

impl MagicLinkService {
    /// 新しい MagicLinkService を作成
    pub fn new(
        user_repo: UserRepository,
        token_repo: MagicLinkTokenRepository,
        email_service: EmailService,
        config: Arc<Config>,
    ) -> Self {
        Self {
            user_repo,
            token_repo,
            email_service,
            config,
        }
    }

    /// マジックリンクの送信をリクエスト
    ///
    /// # Security
    /// - ユーザーが存在しない場合も常に成功を返す（情報漏洩防止）
    /// - トークン（平文）はログに出力しない
    pub async fn request_link(&self, email: &str) -> Result<(), AppError> {
        tracing::info!(email = %email, "マジックリンクリクエスト");

        let user = self.user_repo.find_by_email(email).await?;

        // ユーザーが存在しない場合も成功を返す（情報漏洩防止）
        let user = match user {
            Some(u) => u,
            None => {
                tracing::info!(email = %email, "マジックリンク: ユーザー不在（成功レスポンス返却）");
                return Ok(());
            }
        };

        // 32バイトランダムトークン生成
        let token = self.generate_token();

        // SHA256ハッシュ化して保存（DBには平文を残さない）
        let token_hash = self.hash_token(&token);

        let expires_at =
            OffsetDateTime::now_utc() + Duration::seconds(self.config.magic_link_token_ttl_secs);

        self.token_repo
            .create(user.id, &token_hash, expires_at)
            .await?;

        let link_url = self.build_link_url(&token);

        self.email_service
            .send_magic_link_email(email, &link_url)
            .await?;

        tracing::info!(email = %email, "マジックリンクメール送信完了");

        Ok(())
    }

    /// マジックリンクトークンを消費し、対象ユーザーIDを返す
    ///
    /// 不在・使用済み・期限切れはすべて失敗。成功時はトークンを
    /// 使用済みにマークする（単回使用）
    ///
    /// # Security
    /// - トークンはログに出力しない
    pub async fn consume(&self, token: &str) -> Result<Uuid, AppError> {
        let token_hash = self.hash_token(token);

        let link_token = self
            .token_repo
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        // 使用済みチェック
        if link_token.used_at.is_some() {
            tracing::warn!(token_id = %link_token.id, "使用済みトークン");
            return Err(AppError::TokenExpired);
        }

        // 有効期限チェック
        if link_token.expires_at < OffsetDateTime::now_utc() {
            tracing::warn!(token_id = %link_token.id, "期限切れトークン");
            return Err(AppError::TokenExpired);
        }

        self.token_repo.mark_as_used(link_token.id).await?;

        tracing::info!(user_id = %link_token.user_id, "マジックリンク消費成功");

        Ok(link_token.user_id)
    }

    /// 32バイトのランダムトークンを生成
    fn generate_token(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// トークンをSHA256でハッシュ化
    fn hash_token(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// ログインURLを構築
    fn build_link_url(&self, token: &str) -> String {
        match &self.config.magic_link_url_base {
            Some(base) => format!("{}?token={}", base, token),
            None => format!("http://localhost:3000/magic-link?token={}", token),
        }
    }
}
