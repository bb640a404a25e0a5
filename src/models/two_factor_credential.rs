use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// ユーザーの二要素認証クレデンシャル（ユーザーと1対1）
///
/// シークレットは AES-256-GCM で暗号化されて保存される（作成後は不変）。
/// バックアップコードは使用のたびに1件ずつ削除され、再利用されない。
/// 平文シークレット・バックアップコードはログに出力禁止
#[derive(Debug, FromRow, Serialize)]
pub struct TwoFactorCredential {
    pub user_id: Uuid,
    #[serde(skip)]
    pub secret_encrypted: Vec<u8>,
    #[serde(skip)]
    pub backup_codes: Vec<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TwoFactorCredential {
    /// クレデンシャルとして実際に使用可能か
    ///
    /// 2FAフラグが立っているのにシークレットが空の行は
    /// 「設定未完了」の不整合として扱う
    pub fn has_usable_secret(&self) -> bool {
        !self.secret_encrypted.is_empty()
    }
}
