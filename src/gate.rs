//! リクエストゲート
//!
//! 全リクエストに適用されるエッジインターセプター。リゾルバーに問い合わせ、
//! ブロック済みアカウント・2FA未検証・管理者ルート・認証要否のポリシーを
//! 順序付きで適用する。
//!
//! リダイレクト先は設定ではなくコードに固定されたポリシー定数。
//! ロール・ブロック状態はリクエストごとに評価する（キャッシュなし）

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::error::AppError;
use crate::services::fingerprint::ClientMeta;
use crate::services::{SessionInfo, TwoFactorRequirement};
use crate::state::AppState;

/// 第二要素チャレンジページ
pub const CHALLENGE_PATH: &str = "/two-factor";
/// ブロック済みアカウントページ
pub const BLOCKED_PATH: &str = "/blocked";
/// ログインページ
pub const LOGIN_PATH: &str = "/login";
/// ホーム
pub const HOME_PATH: &str = "/";

/// 全チェックをバイパスするパス接頭辞。
/// チャレンジページ自身を含めないと、チャレンジページに到達できなくなる
const EXCLUDED_PREFIXES: &[&str] = &["/static/", "/api/health", "/two-factor", "/blocked"];

/// 管理者ロールが必要なパス接頭辞
const ADMIN_PREFIX: &str = "/admin";

/// 未認証の訪問者専用ページ
const GUEST_ONLY_PATHS: &[&str] = &["/login", "/register"];

/// 認証不要の公開パス接頭辞（ログイン系API）
const PUBLIC_PREFIXES: &[&str] = &["/api/login", "/api/magic-link", "/api/oauth/"];

/// 2FA設定中でも通すパス（2FAを有効化する操作そのもの）。
/// パス一致と Content-Type 確認の両方を要求して範囲を最小化する
const SETUP_ALLOWLIST: &[&str] = &["/api/2fa/setup", "/api/2fa/activate"];

/// OAuthコールバックの接頭辞。
/// コールバックオーケストレーターが自前でブロック・2FA判定を行い、
/// 保留チャレンジCookieを設定してからチャレンジページへ誘導する。
/// ここで先にリダイレクトするとそのフローに到達できない
const OAUTH_CALLBACK_PREFIX: &str = "/api/oauth/";

/// ログアウトパス。チャレンジを完了できないユーザーもサインアウトは
/// できなければならない
const LOGOUT_PATH: &str = "/api/logout";

/// パスが全チェックをバイパスするか
fn is_excluded(path: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// パスが管理者専用か
fn is_admin_path(path: &str) -> bool {
    path.starts_with(ADMIN_PREFIX)
}

/// パスが未認証訪問者専用か
fn is_guest_only(path: &str) -> bool {
    GUEST_ONLY_PATHS.contains(&path)
}

/// パスが認証不要か
fn is_public(path: &str) -> bool {
    is_guest_only(path) || path == HOME_PATH || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// 2FA未検証でも通す設定操作か
///
/// 同一オリジンの状態変更リクエスト（フォームまたはJSON）かつ
/// 許可リスト内のパスである場合のみ
fn is_setup_allowance(path: &str, content_type: Option<&str>) -> bool {
    if !SETUP_ALLOWLIST.contains(&path) {
        return false;
    }
    match content_type {
        Some(ct) => {
            ct.starts_with("application/json")
                || ct.starts_with("application/x-www-form-urlencoded")
                || ct.starts_with("multipart/form-data")
        }
        None => false,
    }
}

/// RequiredUnverified のままでも通してよいリクエストか
///
/// - 2FA設定操作（パス許可リスト AND Content-Type）
/// - ゲスト専用ページ（ログインのやり直しを妨げない）
/// - OAuthコールバック（保留チャレンジの設定はオーケストレーターの仕事）
/// - ログアウト（チャレンジ未完了でもサインアウトは可能）
fn may_pass_unverified(path: &str, content_type: Option<&str>) -> bool {
    is_setup_allowance(path, content_type)
        || is_guest_only(path)
        || path.starts_with(OAUTH_CALLBACK_PREFIX)
        || path == LOGOUT_PATH
}

/// ゲートミドルウェア
///
/// 順序付きチェック:
/// 1. 除外パス → バイパス
/// 2. ブロック済みユーザー → ブロックページへ
/// 3. RequiredUnverified → チャレンジページへ（設定許可リストを除く）
/// 4. 管理者パス → ロール確認
/// 5. 認証必須パス → 未認証はログインページへ
/// 6. ゲスト専用パス → 認証済みはホームへ（チャレンジ中を除く）
pub async fn gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    // 1. 除外パス
    if is_excluded(&path) {
        return Ok(next.run(request).await);
    }

    let session = lookup_session(&state, request.headers()).await?;

    match session {
        Some(session) => {
            // 2. ブロック済み（他の全ルールに優先）
            if session.blocked {
                tracing::warn!(user_id = %session.user_id, "ブロック済みユーザーのアクセス");
                return Ok(Redirect::to(BLOCKED_PATH).into_response());
            }

            let meta = ClientMeta::from_headers(request.headers());
            let has_marker = state
                .session_cookies
                .read_verified_marker(request.headers(), session.user_id);

            let resolution = state
                .resolver
                .resolve(
                    session.user_id,
                    session.two_factor_enabled,
                    &meta.device_id,
                    has_marker,
                )
                .await?;

            // 3. 2FA未検証 → チャレンジへ（狭い許可リストを除く）
            if resolution.requirement == TwoFactorRequirement::RequiredUnverified {
                let content_type = request
                    .headers()
                    .get(axum::http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string());

                if !may_pass_unverified(&path, content_type.as_deref()) {
                    return Ok(Redirect::to(CHALLENGE_PATH).into_response());
                }
            } else if resolution.trusted_device {
                // 信頼済みデバイス経路で通過 → last_used を更新（失敗しても遮断しない）
                if let Err(e) = state
                    .trusted_device_repo
                    .touch(session.user_id, &meta.device_id)
                    .await
                {
                    tracing::warn!(error = ?e, user_id = %session.user_id, "last_used 更新失敗");
                }
            }

            // 4. 管理者パス
            if is_admin_path(&path) && !session.is_admin() {
                tracing::warn!(user_id = %session.user_id, path = %path, "管理者パスへの非管理者アクセス");
                return Ok(Redirect::to(HOME_PATH).into_response());
            }

            // 6. ゲスト専用パス（チャレンジ中は除く - 上で許可済み）
            if is_guest_only(&path)
                && resolution.requirement != TwoFactorRequirement::RequiredUnverified
            {
                return Ok(Redirect::to(HOME_PATH).into_response());
            }

            // ハンドラーへセッションを引き渡す
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
        None => {
            // 4. 管理者パス（未認証）/ 5. 認証必須パス
            if is_admin_path(&path) || !is_public(&path) {
                return Ok(Redirect::to(LOGIN_PATH).into_response());
            }
            Ok(next.run(request).await)
        }
    }
}

/// Cookieヘッダーからセッションを照会（Cookie不在なら照会しない）
async fn lookup_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<SessionInfo>, AppError> {
    let Some(cookie_header) = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(None);
    };

    state.session_client.get_session(cookie_header).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_paths() {
        assert!(is_excluded("/static/app.css"));
        assert!(is_excluded("/api/health"));
        assert!(is_excluded("/two-factor"));
        assert!(is_excluded("/two-factor/challenge"));
        assert!(is_excluded("/blocked"));
        assert!(!is_excluded("/api/login"));
        assert!(!is_excluded("/admin/users"));
    }

    #[test]
    fn test_admin_paths() {
        assert!(is_admin_path("/admin"));
        assert!(is_admin_path("/admin/devices"));
        assert!(!is_admin_path("/api/login"));
    }

    #[test]
    fn test_guest_only_exact_match() {
        assert!(is_guest_only("/login"));
        assert!(is_guest_only("/register"));
        assert!(!is_guest_only("/login/extra"));
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public("/"));
        assert!(is_public("/login"));
        assert!(is_public("/api/login"));
        assert!(is_public("/api/magic-link/request"));
        assert!(is_public("/api/oauth/google/callback"));
        assert!(!is_public("/api/devices"));
        assert!(!is_public("/admin"));
    }

    #[test]
    fn test_oauth_callback_passes_while_unverified() {
        // コールバックはチャレンジリダイレクトの前に到達できなければ
        // 保留チャレンジCookieを設定できない
        assert!(may_pass_unverified("/api/oauth/google/callback", None));
        assert!(may_pass_unverified("/api/oauth/github/callback", None));
        // コールバック以外のAPIは引き続きリダイレクト対象
        assert!(!may_pass_unverified("/api/devices", None));
    }

    #[test]
    fn test_logout_passes_while_unverified() {
        // チャレンジを完了できないユーザーもサインアウトはできる
        assert!(may_pass_unverified("/api/logout", Some("application/json")));
        assert!(may_pass_unverified("/api/logout", None));
    }

    #[test]
    fn test_guest_pages_pass_while_unverified() {
        assert!(may_pass_unverified("/login", None));
        assert!(may_pass_unverified("/register", None));
    }

    #[test]
    fn test_setup_allowance_requires_path_and_content_type() {
        // パスと Content-Type の両方が揃った場合のみ許可
        assert!(is_setup_allowance("/api/2fa/setup", Some("application/json")));
        assert!(is_setup_allowance(
            "/api/2fa/activate",
            Some("application/x-www-form-urlencoded")
        ));
        assert!(is_setup_allowance(
            "/api/2fa/setup",
            Some("multipart/form-data; boundary=x")
        ));
        // Content-Type なしは拒否
        assert!(!is_setup_allowance("/api/2fa/setup", None));
        // 許可リスト外のパスは拒否
        assert!(!is_setup_allowance("/api/2fa/disable", Some("application/json")));
        // 無関係な Content-Type は拒否
        assert!(!is_setup_allowance("/api/2fa/setup", Some("text/plain")));
    }
}
