use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};

use crate::error::AppError;
use crate::gate::{CHALLENGE_PATH, HOME_PATH, LOGIN_PATH};
use crate::services::TwoFactorRequirement;
use crate::services::fingerprint::ClientMeta;
use crate::state::AppState;

/// OAuthコールバックハンドラー
///
/// GET /api/oauth/{provider}/callback
///
/// IDプロバイダーレベルのログインはセッションプロバイダーが完了済み。
/// ここでは 2FA 要求を判定し、必要なら保留チャレンジCookieを設定して
/// チャレンジページへリダイレクトする。
///
/// # Security
/// - 保留Cookieにはプロバイダー名のみ（シークレット禁止）
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // コールバック時点でセッションが確立しているはず
    let cookie_header = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok());

    let session = match cookie_header {
        Some(cookie) => state.session_client.get_session(cookie).await?,
        None => None,
    };

    let Some(session) = session else {
        tracing::warn!(provider = %provider, "OAuthコールバック: セッション不在");
        return Ok(Redirect::to(LOGIN_PATH).into_response());
    };

    if session.blocked {
        return Err(AppError::AccountBlocked);
    }

    // コールバックリクエスト自体のフィンガープリントで判定
    let meta = ClientMeta::from_headers(&headers);
    let has_marker = state
        .session_cookies
        .read_verified_marker(&headers, session.user_id);

    let resolution = state
        .resolver
        .resolve(
            session.user_id,
            session.two_factor_enabled,
            &meta.device_id,
            has_marker,
        )
        .await?;

    if resolution.requirement == TwoFactorRequirement::RequiredUnverified {
        // 保留チャレンジを設定してチャレンジページへ
        let pending = state.session_cookies.issue_pending_oauth(&provider)?;

        tracing::info!(
            user_id = %session.user_id,
            provider = %provider,
            "OAuthログイン完了、第二要素チャレンジへ"
        );

        return Ok((
            AppendHeaders([(axum::http::header::SET_COOKIE, pending)]),
            Redirect::to(CHALLENGE_PATH),
        )
            .into_response());
    }

    tracing::info!(user_id = %session.user_id, provider = %provider, "OAuthログイン完了");

    Ok(Redirect::to(HOME_PATH).into_response())
}
