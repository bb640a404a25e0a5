//! 外部セッションプロバイダークライアント
//!
//! ゲート本体はセッションを発行しない。セッションの検証・確立・失効は
//! すべて外部プロバイダーの Admin API に委譲する

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// プロバイダーが返すセッション情報
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub two_factor_enabled: bool,
}

impl SessionInfo {
    /// 管理者ロールか
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// セッション確立リクエスト（trustgate → プロバイダー）
#[derive(Debug, Serialize)]
pub struct AcceptLoginRequest {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_for: Option<i64>,
}

/// プロバイダーのリダイレクトレスポンス
#[derive(Debug, Deserialize)]
pub struct ProviderRedirectResponse {
    pub redirect_to: String,
}

/// セッションプロバイダー Admin API クライアント
#[derive(Clone)]
pub struct SessionClient {
    client: reqwest::Client,
    admin_url: String,
}

impl SessionClient {
    /// 新しい SessionClient を作成
    pub fn new(admin_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_url,
        }
    }

    /// 現在のリクエストに紐づくセッションを照会
    ///
    /// Cookieヘッダーをそのまま転送し、プロバイダーに検証させる。
    /// 401/404 はセッション不在として None（エラーにしない）
    pub async fn get_session(&self, cookie_header: &str) -> Result<Option<SessionInfo>, AppError> {
        let url = format!("{}/admin/sessions/whoami", self.admin_url);

        let response: reqwest::Response = self
            .client
            .get(&url)
            .header(reqwest::header::COOKIE, cookie_header)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("セッション不在");
            return Ok(None);
        }
        if !status.is_success() {
            tracing::error!(status = %status, "セッション照会失敗");
            return Err(AppError::Internal(anyhow::anyhow!(
                "session provider returned status: {}",
                status
            )));
        }

        let session: SessionInfo = response.json().await.map_err(|e| {
            tracing::error!(error = ?e, "セッションプロバイダーレスポンスのパースエラー");
            AppError::Internal(anyhow::anyhow!("Failed to parse session provider response"))
        })?;

        tracing::debug!(user_id = %session.user_id, "セッション照会成功");
        Ok(Some(session))
    }

    /// ログインを承認しセッションを確立
    ///
    /// 認証（第一要素＋必要なら第二要素）が完了した時に呼ぶ
    pub async fn accept_login(
        &self,
        subject: &str,
        remember: bool,
        remember_for: i64,
    ) -> Result<String, AppError> {
        let url = format!("{}/admin/sessions/accept", self.admin_url);

        let body = AcceptLoginRequest {
            subject: subject.to_string(),
            remember: Some(remember),
            remember_for: Some(remember_for),
        };

        let response: reqwest::Response = self.client.put(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, "セッション確立失敗");
            return Err(AppError::Internal(anyhow::anyhow!(
                "session provider accept returned status: {}",
                status
            )));
        }

        let redirect: ProviderRedirectResponse = response.json().await.map_err(|e| {
            tracing::error!(error = ?e, "セッションプロバイダーレスポンスのパースエラー");
            AppError::Internal(anyhow::anyhow!("Failed to parse session provider response"))
        })?;

        tracing::info!("セッション確立成功");
        Ok(redirect.redirect_to)
    }

    /// セッションを失効
    ///
    /// サインアウト時にプロバイダーに通知する
    pub async fn revoke_session(&self, subject: &str) -> Result<(), AppError> {
        let url = format!("{}/admin/sessions/revoke?subject={}", self.admin_url, subject);

        let response: reqwest::Response = self.client.delete(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, "セッション失効失敗");
            return Err(AppError::Internal(anyhow::anyhow!(
                "session provider revoke returned status: {}",
                status
            )));
        }

        tracing::info!("セッション失効成功");
        Ok(())
    }
}
