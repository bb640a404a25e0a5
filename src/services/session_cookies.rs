//! 検証マーカー／OAuth保留チャレンジのCookie管理
//!
//! どちらも短命のクライアント側状態で、AES-256-GCM で封印して保存する。
//!
//! # Security
//! - マーカーは発行対象の user_id を内包し、他ユーザーへの流用を防ぐ
//! - 保留チャレンジは発行時刻を内包し、期限切れは読み取り時に失敗閉止
//! - 改ざんされたCookieは「存在しない」ものとして扱う
//! - Cookieにはシークレットを一切含めない（保留チャレンジはプロバイダー名のみ）

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use axum::http::HeaderMap;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use cookie::{Cookie, SameSite};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;

/// 検証マーカーCookie名（ブラウザセッション限り - Max-Age なし）
pub const VERIFIED_MARKER_COOKIE: &str = "tg_2fa_verified";
/// OAuth保留チャレンジCookie名
pub const PENDING_OAUTH_COOKIE: &str = "tg_oauth_pending";

/// 検証マーカーのペイロード
#[derive(Debug, Serialize, Deserialize)]
struct MarkerPayload {
    user_id: Uuid,
    issued_at: i64,
}

/// OAuthログインが成立済みで第二要素の完了待ちであることを示す
///
/// プロバイダー名は表示専用。シークレットは運ばない
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOAuthChallenge {
    pub provider: String,
    pub issued_at: i64,
}

/// 封印Cookieサービス
#[derive(Clone)]
pub struct SessionCookies {
    seal_key: [u8; 32],
    secure: bool,
    pending_ttl_secs: i64,
}

impl SessionCookies {
    /// 新しい SessionCookies を作成
    ///
    /// # Arguments
    /// * `seal_secret_base64` - Base64エンコードされた32バイトの封印キー
    pub fn new(
        seal_secret_base64: &str,
        secure: bool,
        pending_ttl_secs: i64,
    ) -> Result<Self, AppError> {
        use base64::engine::general_purpose::STANDARD;

        let key_bytes = URL_SAFE_NO_PAD
            .decode(seal_secret_base64)
            .or_else(|_| STANDARD.decode(seal_secret_base64))
            .map_err(|e| {
                tracing::error!(error = ?e, "Cookie封印キーのBase64デコードエラー");
                AppError::Internal(anyhow::anyhow!("invalid cookie seal key format"))
            })?;

        if key_bytes.len() != 32 {
            tracing::error!(
                expected = 32,
                actual = key_bytes.len(),
                "Cookie封印キーの長さが不正"
            );
            return Err(AppError::Internal(anyhow::anyhow!(
                "cookie seal key must be 32 bytes"
            )));
        }

        let mut seal_key = [0u8; 32];
        seal_key.copy_from_slice(&key_bytes);

        Ok(Self {
            seal_key,
            secure,
            pending_ttl_secs,
        })
    }

    // ========================================================================
    // 検証マーカー
    // ========================================================================

    /// 検証マーカーCookieを発行（Set-Cookie 値を返す）
    ///
    /// Max-Age を付けない = ブラウザセッション終了で消える
    pub fn issue_verified_marker(&self, user_id: Uuid) -> Result<String, AppError> {
        let payload = MarkerPayload {
            user_id,
            issued_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        let sealed = self.seal(&serde_json::to_vec(&payload).map_err(|e| {
            tracing::error!(error = ?e, "マーカーのシリアライズエラー");
            AppError::Internal(anyhow::anyhow!("marker serialization error"))
        })?)?;

        Ok(self.build_cookie(VERIFIED_MARKER_COOKIE, &sealed, None))
    }

    /// 現在のリクエストに有効な検証マーカーがあるか
    ///
    /// マーカーは発行時の user_id と一致する場合のみ有効。
    /// 復号失敗・他ユーザーのマーカーは「不在」として扱う
    pub fn read_verified_marker(&self, headers: &HeaderMap, user_id: Uuid) -> bool {
        let Some(value) = cookie_value(headers, VERIFIED_MARKER_COOKIE) else {
            return false;
        };
        let Some(plaintext) = self.unseal(&value) else {
            tracing::warn!("検証マーカーの復号失敗（改ざんまたはキー変更の可能性）");
            return false;
        };
        match serde_json::from_slice::<MarkerPayload>(&plaintext) {
            Ok(payload) => payload.user_id == user_id,
            Err(_) => false,
        }
    }

    /// 検証マーカーを消去する Set-Cookie 値（サインアウト時）
    pub fn clear_verified_marker(&self) -> String {
        self.build_removal_cookie(VERIFIED_MARKER_COOKIE)
    }

    // ========================================================================
    // OAuth保留チャレンジ
    // ========================================================================

    /// 保留チャレンジCookieを発行（Set-Cookie 値を返す）
    pub fn issue_pending_oauth(&self, provider: &str) -> Result<String, AppError> {
        let payload = PendingOAuthChallenge {
            provider: provider.to_string(),
            issued_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        let sealed = self.seal(&serde_json::to_vec(&payload).map_err(|e| {
            tracing::error!(error = ?e, "保留チャレンジのシリアライズエラー");
            AppError::Internal(anyhow::anyhow!("pending challenge serialization error"))
        })?)?;

        Ok(self.build_cookie(PENDING_OAUTH_COOKIE, &sealed, Some(self.pending_ttl_secs)))
    }

    /// 保留チャレンジを読み取る
    ///
    /// TTL超過は期限切れとして None（失敗閉止 - フローの再開を要求する）
    pub fn read_pending_oauth(&self, headers: &HeaderMap) -> Option<PendingOAuthChallenge> {
        let value = cookie_value(headers, PENDING_OAUTH_COOKIE)?;
        let plaintext = self.unseal(&value)?;
        let payload: PendingOAuthChallenge = serde_json::from_slice(&plaintext).ok()?;

        let age = OffsetDateTime::now_utc().unix_timestamp() - payload.issued_at;
        if age < 0 || age > self.pending_ttl_secs {
            tracing::info!(provider = %payload.provider, "OAuth保留チャレンジの期限切れ");
            return None;
        }

        Some(payload)
    }

    /// 保留チャレンジを消去する Set-Cookie 値
    pub fn clear_pending_oauth(&self) -> String {
        self.build_removal_cookie(PENDING_OAUTH_COOKIE)
    }

    // ========================================================================
    // 内部処理
    // ========================================================================

    /// ペイロードを AES-256-GCM で封印し、Base64 URL-safe エンコード
    fn seal(&self, plaintext: &[u8]) -> Result<String, AppError> {
        let cipher = Aes256Gcm::new_from_slice(&self.seal_key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })?;

        // 96ビット (12バイト) のランダム nonce 生成
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| {
            tracing::error!(error = ?e, "Cookie封印エラー");
            AppError::Internal(anyhow::anyhow!("cookie seal error"))
        })?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(&combined))
    }

    /// 封印値を復号。失敗は None（改ざんは「不在」と同じ扱い）
    fn unseal(&self, sealed: &str) -> Option<Vec<u8>> {
        let encrypted = URL_SAFE_NO_PAD.decode(sealed).ok()?;
        if encrypted.len() < 12 {
            return None;
        }

        let cipher = Aes256Gcm::new_from_slice(&self.seal_key).ok()?;
        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher.decrypt(nonce, ciphertext).ok()
    }

    /// Cookie文字列を構築
    ///
    /// http-only / SameSite=Lax / path=/ はセッションプロバイダーの
    /// Cookieと共存するための互換フラグ（変更不可）
    fn build_cookie(&self, name: &str, value: &str, max_age_secs: Option<i64>) -> String {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/");

        if let Some(secs) = max_age_secs {
            builder = builder.max_age(time::Duration::seconds(secs));
        }

        builder.build().to_string()
    }

    /// 即時失効するCookie文字列を構築（Max-Age=0）
    fn build_removal_cookie(&self, name: &str) -> String {
        Cookie::build((name.to_string(), String::new()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(0))
            .build()
            .to_string()
    }
}

/// Cookieヘッダーから指定名の値を取り出す
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        if let Ok(parsed) = Cookie::parse(part.trim().to_string()) {
            if parsed.name() == name {
                return Some(parsed.value().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn create_test_service() -> SessionCookies {
        let key = [0u8; 32];
        let key_base64 = STANDARD.encode(key);
        SessionCookies::new(&key_base64, true, 600).unwrap()
    }

    fn headers_with_cookie(set_cookie: &str) -> HeaderMap {
        // Set-Cookie 値の先頭 "name=value" 部分を Cookie ヘッダーに移す
        let pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, pair.parse().unwrap());
        headers
    }

    #[test]
    fn test_marker_roundtrip() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let set_cookie = service.issue_verified_marker(user_id).unwrap();
        // セッションCookie: Max-Age を付けない
        assert!(!set_cookie.contains("Max-Age"));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Path=/"));

        let headers = headers_with_cookie(&set_cookie);
        assert!(service.read_verified_marker(&headers, user_id));
    }

    #[test]
    fn test_marker_bound_to_user() {
        // 他ユーザー向けに発行されたマーカーは無効
        let service = create_test_service();
        let set_cookie = service.issue_verified_marker(Uuid::new_v4()).unwrap();

        let headers = headers_with_cookie(&set_cookie);
        assert!(!service.read_verified_marker(&headers, Uuid::new_v4()));
    }

    #[test]
    fn test_marker_tampered_treated_as_absent() {
        let service = create_test_service();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            format!("{VERIFIED_MARKER_COOKIE}=not-a-sealed-value")
                .parse()
                .unwrap(),
        );
        assert!(!service.read_verified_marker(&headers, Uuid::new_v4()));
    }

    #[test]
    fn test_marker_absent() {
        let service = create_test_service();
        let headers = HeaderMap::new();
        assert!(!service.read_verified_marker(&headers, Uuid::new_v4()));
    }

    #[test]
    fn test_pending_oauth_roundtrip() {
        let service = create_test_service();
        let set_cookie = service.issue_pending_oauth("google").unwrap();
        assert!(set_cookie.contains("Max-Age=600"));

        let headers = headers_with_cookie(&set_cookie);
        let pending = service.read_pending_oauth(&headers).unwrap();
        assert_eq!(pending.provider, "google");
    }

    #[test]
    fn test_pending_oauth_expired_fails_closed() {
        let service = create_test_service();

        // 期限切れの issued_at を持つペイロードを直接封印する
        let stale = PendingOAuthChallenge {
            provider: "google".to_string(),
            issued_at: OffsetDateTime::now_utc().unix_timestamp() - 601,
        };
        let sealed = service.seal(&serde_json::to_vec(&stale).unwrap()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            format!("{PENDING_OAUTH_COOKIE}={sealed}").parse().unwrap(),
        );
        assert!(service.read_pending_oauth(&headers).is_none());
    }

    #[test]
    fn test_clear_cookies_expire_immediately() {
        let service = create_test_service();
        assert!(service.clear_verified_marker().contains("Max-Age=0"));
        assert!(service.clear_pending_oauth().contains("Max-Age=0"));
    }

    #[test]
    fn test_seal_unseal_tamper_rejected() {
        let service = create_test_service();
        let sealed = service.seal(b"payload").unwrap();

        assert_eq!(service.unseal(&sealed).unwrap(), b"payload");
        assert!(service.unseal("not-valid-base64!!!").is_none());

        // 改ざんされたデータ
        let tampered = URL_SAFE_NO_PAD.encode([0u8; 50]);
        assert!(service.unseal(&tampered).is_none());
    }

    #[test]
    fn test_new_with_invalid_key() {
        assert!(SessionCookies::new("not-valid-base64!!!", true, 600).is_err());
        let short_key = STANDARD.encode([0u8; 16]);
        assert!(SessionCookies::new(&short_key, true, 600).is_err());
    }
}
