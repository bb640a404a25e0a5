use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::TwoFactorRequirement;
use crate::services::fingerprint::ClientMeta;
use crate::state::AppState;

/// セッションの標準有効期間（秒）
const SESSION_REMEMBER_FOR_SECS: i64 = 3600;

// === Magic Link Request ===

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
    /// 2FA有効アカウントの場合の第二要素コード
    pub code: Option<String>,
    pub backup_code: Option<String>,
    #[serde(default)]
    pub trust_device: bool,
}

#[derive(Debug, Serialize)]
pub struct MagicLinkRequestResponse {
    /// リンク送信を受理したか（アカウント不在でも true）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_2fa: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<&'static str>,
}

/// マジックリンク送信リクエストハンドラー
///
/// POST /api/magic-link/request
///
/// リンク自体がアクセスを許可するため、第二要素が満たされるまで
/// 送信してはならない。
///
/// # Security
/// - アカウントの存在有無を応答の形から推測できてはならない。
///   不在アカウントは「2FA不要で送信受理」と同じ形の応答を返す
/// - コード・トークンはログに出力しない
pub async fn request_magic_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MagicLinkRequest>,
) -> Result<Response, AppError> {
    validate_email(&request.email)?;

    let meta = ClientMeta::from_headers(&headers);

    // セッション前の2FA判定（不在アカウントは NotRequired と同形）
    let resolution = state
        .resolver
        .resolve_for_email(&request.email, &meta.device_id)
        .await?;

    let submitted = request
        .code
        .as_deref()
        .or(request.backup_code.as_deref())
        .filter(|c| !c.trim().is_empty());

    if resolution.requirement == TwoFactorRequirement::RequiredUnverified {
        let Some(submitted) = submitted else {
            // コード未提出 → 第二要素を要求（リンクは送らない）
            return Ok(Json(MagicLinkRequestResponse {
                sent: None,
                requires_2fa: Some(true),
                device_id: Some(meta.device_id),
                device_name: Some(meta.device_name),
            })
            .into_response());
        };

        // コード提出あり → 検証してから送信
        let user = state
            .user_repo
            .find_by_email(&request.email)
            .await?
            .ok_or(AppError::CodeInvalid)?;

        let credential = state
            .credential_repo
            .find_by_user_id(user.id)
            .await?
            .ok_or(AppError::CodeInvalid)?;

        let outcome = state.verifier.verify(&credential, submitted).await?;
        if !outcome.ok {
            return Err(AppError::CodeInvalid);
        }

        if request.trust_device {
            state
                .trusted_device_repo
                .upsert(
                    user.id,
                    &meta.device_id,
                    meta.device_name,
                    &meta.user_agent,
                    meta.ip_address.as_deref(),
                )
                .await?;
            tracing::info!(user_id = %user.id, "デバイスを信頼済みとして登録");
        }
    }

    // 第二要素が不要、または検証済み → 送信
    // （不在アカウントはサービス内で黙って成功を返す）
    state.magic_link_service.request_link(&request.email).await?;

    Ok(Json(MagicLinkRequestResponse {
        sent: Some(true),
        requires_2fa: None,
        device_id: None,
        device_name: None,
    })
    .into_response())
}

// === Magic Link Consume ===

#[derive(Debug, Deserialize)]
pub struct ConsumeQuery {
    pub token: String,
}

/// マジックリンク消費ハンドラー
///
/// GET /api/magic-link/consume?token=...
///
/// トークンを単回消費してセッションを確立し、プロバイダーの
/// リダイレクト先へ転送する
pub async fn consume_magic_link(
    State(state): State<AppState>,
    Query(query): Query<ConsumeQuery>,
) -> Result<Response, AppError> {
    if query.token.trim().is_empty() {
        return Err(AppError::Validation("トークンは必須です".to_string()));
    }

    let user_id = state.magic_link_service.consume(&query.token).await?;

    let redirect_to = state
        .session_client
        .accept_login(&user_id.to_string(), true, SESSION_REMEMBER_FOR_SECS)
        .await?;

    tracing::info!(user_id = %user_id, "マジックリンクログイン完了");

    Ok(Redirect::to(&redirect_to).into_response())
}

/// メールアドレスのバリデーション
fn validate_email(email: &str) -> Result<(), AppError> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_email() {
        assert!(validate_email("").is_err());
        assert!(validate_email("   ").is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        assert!(validate_email("no-at-sign").is_err());
    }

    #[test]
    fn test_validate_valid_email() {
        assert!(validate_email("user@example.com").is_ok());
    }
}
