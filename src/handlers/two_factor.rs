use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::User;
use crate::services::fingerprint::ClientMeta;
use crate::services::{SessionInfo, TotpService};
use crate::state::AppState;

// === 2FA Setup ===

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub secret: String,
    pub qr_code: String,
}

/// POST /api/2fa/setup
///
/// 2FA設定を開始（シークレット生成、QRコード返却）。
/// この時点では two_factor_enabled は変更しない -
/// 有効化はコード確認（activate）まで遅延する
///
/// # Security
/// - パスワード確認必須
/// - シークレット平文はログ出力禁止
pub async fn setup_2fa(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Json(request): Json<SetupRequest>,
) -> Result<Json<SetupResponse>, AppError> {
    validate_password(&request.password)?;

    // パスワード確認
    let user = verify_user_password(&state, &session, &request.password).await?;

    if user.two_factor_enabled {
        return Err(AppError::TwoFactorAlreadyEnabled);
    }

    // 有効化前の再設定は許可（古い未確認シークレットを破棄）
    if state
        .credential_repo
        .find_by_user_id(user.id)
        .await?
        .is_some()
    {
        state.credential_repo.delete(user.id).await?;
    }

    // シークレット生成・暗号化して保存（バックアップコードは有効化時に生成）
    let secret = TotpService::generate_secret();
    let encrypted = state.totp_service.encrypt_secret(&secret)?;
    state
        .credential_repo
        .create(user.id, &encrypted, &[])
        .await?;

    let qr_code = state.totp_service.generate_qr_code(&user.email, &secret)?;

    tracing::info!(user_id = %user.id, "2FA設定開始");

    Ok(Json(SetupResponse {
        secret,
        qr_code: format!("data:image/png;base64,{}", qr_code),
    }))
}

// === 2FA Activate ===

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub enabled: bool,
    /// 一度だけ表示されるバックアップコード一式
    pub backup_codes: Vec<String>,
}

/// POST /api/2fa/activate
///
/// 2FA有効化（新しいシークレットに対する初回コード検証）。
/// 検証成功時のみ two_factor_enabled を true にし、バックアップコードを
/// 生成して返す
///
/// # Security
/// - コードはログ出力禁止
/// - バックアップコードはこのレスポンスでのみ平文で返る
pub async fn activate_2fa(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Json(request): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>, AppError> {
    validate_totp_code(&request.code)?;

    let user = state
        .user_repo
        .find_by_id(session.user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    if user.two_factor_enabled {
        return Err(AppError::TwoFactorAlreadyEnabled);
    }

    let credential = state
        .credential_repo
        .find_by_user_id(user.id)
        .await?
        .ok_or(AppError::TwoFactorNotEnabled)?;

    // シークレット復号・コード検証
    let secret = state
        .totp_service
        .decrypt_secret(&credential.secret_encrypted)?;
    if !state.totp_service.verify_code(&secret, &request.code)? {
        return Err(AppError::CodeInvalid);
    }

    // バックアップコード生成と有効化
    let backup_codes = TotpService::generate_backup_codes();
    state
        .credential_repo
        .set_backup_codes(user.id, &backup_codes)
        .await?;
    state.user_repo.set_two_factor_enabled(user.id, true).await?;

    tracing::info!(user_id = %user.id, "2FA有効化完了");

    Ok(Json(ActivateResponse {
        enabled: true,
        backup_codes,
    }))
}

// === 2FA Disable ===

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub disabled: bool,
    /// 同時に失効した信頼済みデバイス数
    pub revoked_devices: u64,
}

/// POST /api/2fa/disable
///
/// 2FA無効化。信頼済みデバイスの全失効は同一操作内で同期的に行い、
/// 失敗した場合は無効化自体を失敗として報告する
///
/// # Security
/// - パスワード確認必須
/// - 第二要素コード確認必須
pub async fn disable_2fa(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Json(request): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, AppError> {
    validate_password(&request.password)?;

    // パスワード確認
    let user = verify_user_password(&state, &session, &request.password).await?;

    if !user.two_factor_enabled {
        return Err(AppError::TwoFactorNotEnabled);
    }

    let credential = state
        .credential_repo
        .find_by_user_id(user.id)
        .await?
        .ok_or(AppError::TwoFactorNotEnabled)?;

    // 第二要素検証（TOTP・バックアップコードどちらでも可）
    let outcome = state.verifier.verify(&credential, &request.code).await?;
    if !outcome.ok {
        return Err(AppError::CodeInvalid);
    }

    // 信頼済みデバイスを先に全失効。失敗はそのまま伝播させる
    // （無効化後に信頼が残るのはセキュリティ退行）
    let revoked_devices = state.trusted_device_repo.remove_all(user.id).await?;

    state.credential_repo.delete(user.id).await?;
    state
        .user_repo
        .set_two_factor_enabled(user.id, false)
        .await?;

    tracing::info!(
        user_id = %user.id,
        revoked_devices = revoked_devices,
        "2FA無効化完了"
    );

    Ok(Json(DisableResponse {
        disabled: true,
        revoked_devices,
    }))
}

// === 2FA Challenge ===

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub code: Option<String>,
    pub backup_code: Option<String>,
    #[serde(default)]
    pub trust_device: bool,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub verified: bool,
}

/// チャレンジページ表示用のコンテキスト
#[derive(Debug, Serialize)]
pub struct ChallengeContextResponse {
    /// OAuth経由の保留チャレンジの場合、発信元プロバイダー名（表示専用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_provider: Option<String>,
}

/// チャレンジコンテキスト取得ハンドラー
///
/// GET /two-factor/challenge
///
/// チャレンジページが「どのログインの続きか」を表示するための情報を返す。
/// 保留チャレンジが期限切れ・改ざん・不在の場合は provider なしで返る
pub async fn challenge_context(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ChallengeContextResponse>, AppError> {
    // ゲート除外パスなのでセッションはここで確認する
    let session = current_session(&state, &headers).await?;

    if session.blocked {
        return Err(AppError::AccountBlocked);
    }

    let pending_provider = state
        .session_cookies
        .read_pending_oauth(&headers)
        .map(|p| p.provider);

    Ok(Json(ChallengeContextResponse { pending_provider }))
}

/// POST /two-factor/challenge
///
/// セッション確立後の第二要素チャレンジ。成功時は検証マーカーCookieを
/// 発行し、オプトインがあればデバイスを信頼済みとして登録する。
///
/// OAuth保留チャレンジCookieは結果にかかわらず消去する
/// （古い保留フラグがセッションを超えて残るのを防ぐ）
///
/// # Note
/// このパスはゲートの除外リストにあるため、セッションはここで照会する
pub async fn challenge_2fa(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChallengeRequest>,
) -> Result<Response, AppError> {
    let session = current_session(&state, &headers).await?;

    if session.blocked {
        return Err(AppError::AccountBlocked);
    }

    let submitted = request
        .code
        .as_deref()
        .or(request.backup_code.as_deref())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Validation("認証コードは必須です".to_string()))?;

    let credential = state
        .credential_repo
        .find_by_user_id(session.user_id)
        .await?
        .ok_or(AppError::TwoFactorNotEnabled)?;

    let outcome = state.verifier.verify(&credential, submitted).await?;

    let clear_pending = state.session_cookies.clear_pending_oauth();

    if !outcome.ok {
        // 失敗でも保留Cookieは消す
        let mut response = AppError::CodeInvalid.into_response();
        if let Ok(value) = HeaderValue::from_str(&clear_pending) {
            response
                .headers_mut()
                .append(axum::http::header::SET_COOKIE, value);
        }
        return Ok(response);
    }

    let meta = ClientMeta::from_headers(&headers);

    // デバイス信頼はユーザーのオプトイン時のみ
    if request.trust_device {
        state
            .trusted_device_repo
            .upsert(
                session.user_id,
                &meta.device_id,
                meta.device_name,
                &meta.user_agent,
                meta.ip_address.as_deref(),
            )
            .await?;
        tracing::info!(user_id = %session.user_id, "デバイスを信頼済みとして登録");
    }

    let marker = state.session_cookies.issue_verified_marker(session.user_id)?;

    tracing::info!(
        user_id = %session.user_id,
        consumed_backup_code = outcome.consumed_backup_code,
        "第二要素チャレンジ成功"
    );

    Ok((
        AppendHeaders([
            (axum::http::header::SET_COOKIE, marker),
            (axum::http::header::SET_COOKIE, clear_pending),
        ]),
        Json(ChallengeResponse { verified: true }),
    )
        .into_response())
}

// === Helper Functions ===

/// Cookieヘッダーからセッションを照会（除外パス用）
async fn current_session(state: &AppState, headers: &HeaderMap) -> Result<SessionInfo, AppError> {
    let cookie_header = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::SessionRequired)?;

    state
        .session_client
        .get_session(cookie_header)
        .await?
        .ok_or(AppError::SessionRequired)
}

/// パスワードバリデーション
fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }
    if password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    Ok(())
}

/// TOTPコードバリデーション
fn validate_totp_code(code: &str) -> Result<(), AppError> {
    if code.is_empty() {
        return Err(AppError::Validation("認証コードは必須です".to_string()));
    }
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "認証コードは6桁の数字で入力してください".to_string(),
        ));
    }
    Ok(())
}

/// セッションユーザーのパスワードを検証し、ユーザー情報を返す
async fn verify_user_password(
    state: &AppState,
    session: &SessionInfo,
    password: &str,
) -> Result<User, AppError> {
    let user = state
        .user_repo
        .find_by_id(session.user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    state.auth_service.authenticate(&user.email, password).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_password() {
        assert!(validate_password("").is_err());
    }

    #[test]
    fn test_validate_short_password() {
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_validate_valid_password() {
        assert!(validate_password("password123").is_ok());
    }

    #[test]
    fn test_validate_empty_code() {
        assert!(validate_totp_code("").is_err());
    }

    #[test]
    fn test_validate_short_code() {
        assert!(validate_totp_code("12345").is_err());
    }

    #[test]
    fn test_validate_non_digit_code() {
        assert!(validate_totp_code("12345a").is_err());
    }

    #[test]
    fn test_validate_valid_code() {
        assert!(validate_totp_code("123456").is_ok());
    }
}
