use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// 信頼済みデバイス
///
/// 二要素認証チャレンジを完了したブラウザに対する恒常的な免除記録。
/// device_id はリクエストメタデータから導出される粗いフィンガープリント
/// （暗号学的な一意性はない）。アクセス判定は必ず (user_id, device_id) の
/// 組で照合すること。
#[derive(Debug, FromRow, Serialize)]
pub struct TrustedDevice {
    pub user_id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub user_agent: String,
    pub ip_address: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_used: OffsetDateTime,
}
