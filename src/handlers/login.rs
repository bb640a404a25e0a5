use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::fingerprint::ClientMeta;
use crate::services::{TwoFactorRequirement, verifier::normalize_backup_code};
use crate::state::AppState;

/// セッションの標準有効期間（秒）
const SESSION_REMEMBER_FOR_SECS: i64 = 3600;

/// ログインリクエスト
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// ユーザーのメールアドレス
    pub email: String,
    /// ユーザーのパスワード
    pub password: String,
    /// TOTPコード（2FA有効ユーザーのみ）
    pub code: Option<String>,
    /// バックアップコード（TOTPの代わり）
    pub backup_code: Option<String>,
    /// このデバイスを信頼済みとして登録するか
    #[serde(default)]
    pub trust_device: bool,
}

/// ログインレスポンス
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// リダイレクト先URL（セッション確立時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    /// 2FAが必要かどうか
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_2fa: Option<bool>,
    /// このリクエストから導出したデバイスID（2FA必要時に返却）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// 表示用デバイス名（2FA必要時に返却）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<&'static str>,
}

/// ログインハンドラー
///
/// POST /api/login
///
/// 処理フロー:
/// 1. リクエストバリデーション
/// 2. ユーザー認証（DB照合）
/// 3. ブロック状態チェック
/// 4. 2FA要求判定（フィンガープリント＋信頼済みデバイス）
/// 5. 必要なら第二要素検証（コード未提出なら requires_2fa 応答）
/// 6. セッションプロバイダーでログイン承認
///
/// # Security
/// - requires_2fa 応答にシークレット・バックアップコードは含めない
/// - 提出コードはログに出力しない
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError> {
    // 1. リクエストバリデーション
    validate_login_request(&request)?;

    // 2. ユーザー認証
    let user = state
        .auth_service
        .authenticate(&request.email, &request.password)
        .await?;

    // 3. ブロック状態チェック
    if user.blocked {
        tracing::warn!(user_id = %user.id, "ブロック済みユーザーのログイン試行");
        return Err(AppError::AccountBlocked);
    }

    // 4. 2FA要求判定（セッション前なので検証マーカーなし）
    let meta = ClientMeta::from_headers(&headers);
    let resolution = state
        .resolver
        .resolve(user.id, user.two_factor_enabled, &meta.device_id, false)
        .await?;

    if resolution.requirement == TwoFactorRequirement::RequiredUnverified {
        let submitted = request
            .code
            .as_deref()
            .or(request.backup_code.as_deref())
            .filter(|c| !c.trim().is_empty());

        let Some(submitted) = submitted else {
            // コード未提出 → 第二要素を要求（セッションは作らない）
            return Ok(Json(LoginResponse {
                redirect_to: None,
                requires_2fa: Some(true),
                device_id: Some(meta.device_id),
                device_name: Some(meta.device_name),
            })
            .into_response());
        };

        // 5. 第二要素検証
        let credential = state
            .credential_repo
            .find_by_user_id(user.id)
            .await?
            .ok_or(AppError::TwoFactorNotEnabled)?;

        let outcome = state.verifier.verify(&credential, submitted).await?;
        if !outcome.ok {
            return Err(AppError::CodeInvalid);
        }

        // デバイス信頼はユーザーのオプトイン時のみ
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

        // 6. セッション確立＋検証マーカー発行
        let marker = state.session_cookies.issue_verified_marker(user.id)?;
        let redirect_to = state
            .session_client
            .accept_login(&user.id.to_string(), true, SESSION_REMEMBER_FOR_SECS)
            .await?;

        tracing::info!(user_id = %user.id, "ログイン完了（第二要素検証済み）");

        return Ok((
            AppendHeaders([(axum::http::header::SET_COOKIE, marker)]),
            Json(LoginResponse {
                redirect_to: Some(redirect_to),
                requires_2fa: None,
                device_id: None,
                device_name: None,
            }),
        )
            .into_response());
    }

    // 6. 2FA不要（または設定未完了で通過扱い）
    let redirect_to = state
        .session_client
        .accept_login(&user.id.to_string(), true, SESSION_REMEMBER_FOR_SECS)
        .await?;

    tracing::info!(user_id = %user.id, "ログイン完了");

    Ok(Json(LoginResponse {
        redirect_to: Some(redirect_to),
        requires_2fa: None,
        device_id: None,
        device_name: None,
    })
    .into_response())
}

/// ログインリクエストのバリデーション
fn validate_login_request(request: &LoginRequest) -> Result<(), AppError> {
    // email: 必須、メール形式
    if request.email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }

    // 簡易的なメール形式チェック（@ が含まれているか）
    if !request.email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }

    // password: 必須、8文字以上
    if request.password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }

    if request.password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }

    // code と backup_code の同時指定は曖昧なので拒否
    if let (Some(code), Some(backup)) = (&request.code, &request.backup_code) {
        if !code.trim().is_empty() && !normalize_backup_code(backup).is_empty() {
            return Err(AppError::Validation(
                "認証コードとバックアップコードは同時に指定できません".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> LoginRequest {
        LoginRequest {
            email: "test@example.com".to_string(),
            password: "password123".to_string(),
            code: None,
            backup_code: None,
            trust_device: false,
        }
    }

    #[test]
    fn test_validate_empty_email() {
        let request = LoginRequest {
            email: "".to_string(),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        let request = LoginRequest {
            email: "invalid-email".to_string(),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_short_password() {
        let request = LoginRequest {
            password: "short".to_string(),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_both_codes_rejected() {
        let request = LoginRequest {
            code: Some("123456".to_string()),
            backup_code: Some("AB12CD34".to_string()),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        assert!(validate_login_request(&base_request()).is_ok());
    }

    #[test]
    fn test_validate_single_code_ok() {
        let request = LoginRequest {
            code: Some("123456".to_string()),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_ok());
    }
}
