use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証エラー: {0}")]
    Authentication(String),

    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("セッションプロバイダーAPI エラー")]
    SessionProvider(#[from] reqwest::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    #[error("セッションが必要です")]
    SessionRequired,

    #[error("アカウントがブロックされています")]
    AccountBlocked,

    #[error("無効または期限切れのリンクです")]
    TokenExpired,

    #[error("トークンが見つかりません")]
    TokenNotFound,

    #[error("認証コードが無効です")]
    CodeInvalid,

    #[error("二要素認証は既に有効です")]
    TwoFactorAlreadyEnabled,

    #[error("二要素認証が有効化されていません")]
    TwoFactorNotEnabled,

    #[error("デバイスが見つかりません")]
    DeviceNotFound,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "メールアドレスまたはパスワードが正しくありません".to_string(),
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::SessionProvider(e) => {
                tracing::error!(error = ?e, "セッションプロバイダー通信エラー");
                (
                    StatusCode::BAD_GATEWAY,
                    "認証サーバーとの通信に失敗しました".to_string(),
                )
            }
            Self::SessionRequired => {
                (StatusCode::UNAUTHORIZED, "ログインが必要です".to_string())
            }
            Self::AccountBlocked => (
                StatusCode::FORBIDDEN,
                "アカウントがブロックされています".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::BAD_REQUEST,
                "無効または期限切れのリンクです".to_string(),
            ),
            Self::TokenNotFound => (
                StatusCode::BAD_REQUEST,
                "無効なリクエストです".to_string(), // 存在有無の漏洩防止
            ),
            // 誤りと期限切れを区別しない（推測の手掛かりを与えない）
            Self::CodeInvalid => (
                StatusCode::UNAUTHORIZED,
                "認証コードが正しくありません".to_string(),
            ),
            Self::TwoFactorAlreadyEnabled => {
                (StatusCode::CONFLICT, "二要素認証は既に有効です".to_string())
            }
            Self::TwoFactorNotEnabled => (
                StatusCode::BAD_REQUEST,
                "二要素認証が有効化されていません".to_string(),
            ),
            Self::DeviceNotFound => (
                StatusCode::NOT_FOUND,
                "デバイスが見つかりません".to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
