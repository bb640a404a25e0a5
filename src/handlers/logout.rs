use axum::{
    Extension, Json,
    extract::State,
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AppError;
use crate::services::SessionInfo;
use crate::state::AppState;

/// ログアウトレスポンス
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// ログアウトハンドラー
///
/// POST /api/logout
///
/// 処理フロー:
/// 1. セッションプロバイダーでセッション失効
/// 2. 検証マーカー・保留チャレンジCookieを消去
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
) -> Result<Response, AppError> {
    state
        .session_client
        .revoke_session(&session.user_id.to_string())
        .await?;

    let clear_marker = state.session_cookies.clear_verified_marker();
    let clear_pending = state.session_cookies.clear_pending_oauth();

    tracing::info!(user_id = %session.user_id, "ログアウト完了");

    Ok((
        AppendHeaders([
            (axum::http::header::SET_COOKIE, clear_marker),
            (axum::http::header::SET_COOKIE, clear_pending),
        ]),
        Json(LogoutResponse { logged_out: true }),
    )
        .into_response())
}
