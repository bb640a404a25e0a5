//! デバイスフィンガープリント導出
//!
//! リクエストメタデータ（User-Agent と IP）から安定したデバイス識別子を
//! 導出する。粗いヒューリスティックであり、暗号学的な一意性はない。
//! 値は不透明な識別子としてのみ扱い、ビジネスロジックでデコードしない。

use axum::http::HeaderMap;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

/// User-Agent が空の場合のプレースホルダー
const UA_PLACEHOLDER: &str = "unknown-ua";
/// IPアドレスが取得できない場合のプレースホルダー
const IP_PLACEHOLDER: &str = "no-ip";
const SEPARATOR: char = '|';

/// 表示用デバイス名のフォールバック
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// リクエストから抽出したクライアントメタデータ
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub user_agent: String,
    pub ip_address: Option<String>,
    pub device_id: String,
    pub device_name: &'static str,
}

impl ClientMeta {
    /// ヘッダーからメタデータを抽出してフィンガープリントを導出
    ///
    /// IPは X-Forwarded-For の先頭ホップを使用（直接接続の場合は不在）
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let ip_address = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let device_id = derive_device_id(&user_agent, ip_address.as_deref());
        let device_name = derive_device_name(&user_agent);

        Self {
            user_agent,
            ip_address,
            device_id,
            device_name,
        }
    }
}

/// デバイスIDを導出（純粋・決定的）
///
/// User-Agent と IP を固定セパレーターで連結し Base64 エンコードする。
/// 可逆だが、復号して使用することは想定しない（不透明な識別子）。
/// 空のUser-Agent・IP不在でも必ず非空の安定した文字列を返す
pub fn derive_device_id(user_agent: &str, ip_address: Option<&str>) -> String {
    let ua = if user_agent.trim().is_empty() {
        UA_PLACEHOLDER
    } else {
        user_agent
    };
    let ip = match ip_address {
        Some(ip) if !ip.trim().is_empty() => ip,
        _ => IP_PLACEHOLDER,
    };

    URL_SAFE_NO_PAD.encode(format!("{ua}{SEPARATOR}{ip}"))
}

/// 表示用デバイス名を導出（ベストエフォート）
///
/// 既知のブラウザトークンをパターンマッチする。セキュリティ上の役割はない。
/// Chrome 系UAは "Safari" も含むため判定順序が重要
pub fn derive_device_name(user_agent: &str) -> &'static str {
    if user_agent.is_empty() {
        return UNKNOWN_DEVICE;
    }
    // Edge/Opera は Chrome トークンも含むので先に判定
    if user_agent.contains("Edg") {
        "Edge"
    } else if user_agent.contains("OPR") || user_agent.contains("Opera") {
        "Opera"
    } else if user_agent.contains("Chrome") {
        "Chrome"
    } else if user_agent.contains("Firefox") {
        "Firefox"
    } else if user_agent.contains("Safari") {
        "Safari"
    } else {
        UNKNOWN_DEVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";
    const SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

    #[test]
    fn test_derive_device_id_deterministic() {
        let a = derive_device_id(CHROME_UA, Some("203.0.113.7"));
        let b = derive_device_id(CHROME_UA, Some("203.0.113.7"));
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_derive_device_id_differs_by_ip() {
        let a = derive_device_id(CHROME_UA, Some("203.0.113.7"));
        let b = derive_device_id(CHROME_UA, Some("203.0.113.8"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_device_id_empty_inputs_stable() {
        // 空入力でもプレースホルダーにより非空かつ安定
        let a = derive_device_id("", None);
        let b = derive_device_id("", None);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_derive_device_id_whitespace_ip_treated_as_absent() {
        let a = derive_device_id(CHROME_UA, Some("   "));
        let b = derive_device_id(CHROME_UA, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_device_name_edge_before_chrome() {
        // Edge のUAは Chrome トークンを含むが Edge と判定される
        assert_eq!(derive_device_name(EDGE_UA), "Edge");
    }

    #[test]
    fn test_derive_device_name_known_browsers() {
        assert_eq!(derive_device_name(CHROME_UA), "Chrome");
        assert_eq!(derive_device_name(FIREFOX_UA), "Firefox");
        assert_eq!(derive_device_name(SAFARI_UA), "Safari");
    }

    #[test]
    fn test_derive_device_name_unknown() {
        assert_eq!(derive_device_name(""), UNKNOWN_DEVICE);
        assert_eq!(derive_device_name("curl/8.4.0"), UNKNOWN_DEVICE);
    }

    #[test]
    fn test_client_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, CHROME_UA.parse().unwrap());
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());

        let meta = ClientMeta::from_headers(&headers);
        assert_eq!(meta.user_agent, CHROME_UA);
        // 先頭ホップのみ
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.device_name, "Chrome");
        assert_eq!(
            meta.device_id,
            derive_device_id(CHROME_UA, Some("203.0.113.7"))
        );
    }

    #[test]
    fn test_client_meta_missing_headers() {
        let headers = HeaderMap::new();
        let meta = ClientMeta::from_headers(&headers);
        assert!(meta.user_agent.is_empty());
        assert!(meta.ip_address.is_none());
        assert!(!meta.device_id.is_empty());
        assert_eq!(meta.device_name, UNKNOWN_DEVICE);
    }
}
