//! 第二要素検証器
//!
//! バックアップコード → TOTP の固定優先順で検証する。
//! どちらにも一致しないコードはハードエラー（6桁数字であっても
//! 許容的なフォールバックは一切行わない）

use crate::error::AppError;
use crate::models::TwoFactorCredential;
use crate::repositories::TwoFactorCredentialRepository;
use crate::services::TotpService;

/// 検証結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub ok: bool,
    /// バックアップコードを消費したか（使い捨て）
    pub consumed_backup_code: bool,
}

impl VerifyOutcome {
    fn rejected() -> Self {
        Self {
            ok: false,
            consumed_backup_code: false,
        }
    }
}

/// バックアップコードの正規化
///
/// 大文字化し、空白とハイフンを除去する。保存側も同じ正規化済み形式
pub fn normalize_backup_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// 第二要素検証サービス
#[derive(Clone)]
pub struct SecondFactorVerifier {
    credential_repo: TwoFactorCredentialRepository,
    totp_service: TotpService,
}

impl SecondFactorVerifier {
    pub fn new(credential_repo: TwoFactorCredentialRepository, totp_service: TotpService) -> Self {
        Self {
            credential_repo,
            totp_service,
        }
    }

    /// 提出されたコードをクレデンシャルに対して検証
    ///
    /// # 検証順序
    /// 1. バックアップコード: 正規化して完全一致。一致したコードは単一の
    ///    UPDATE文で削除される（再利用不可・時刻許容なし）
    /// 2. TOTP: ±2ステップの時間ウィンドウで照合（保存状態への副作用なし）
    ///
    /// 両方に失敗したコードは形式を問わず拒否する
    ///
    /// # Security
    /// 提出コードはログに出力禁止
    pub async fn verify(
        &self,
        credential: &TwoFactorCredential,
        submitted_code: &str,
    ) -> Result<VerifyOutcome, AppError> {
        // 1. バックアップコード（完全一致・クロック非依存のため先に試す）
        let normalized = normalize_backup_code(submitted_code);
        if !normalized.is_empty()
            && self
                .credential_repo
                .consume_backup_code(credential.user_id, &normalized)
                .await?
        {
            tracing::info!(user_id = %credential.user_id, "バックアップコードで検証成功（1件消費）");
            return Ok(VerifyOutcome {
                ok: true,
                consumed_backup_code: true,
            });
        }

        // 2. TOTP
        if credential.has_usable_secret() {
            let secret = self
                .totp_service
                .decrypt_secret(&credential.secret_encrypted)?;
            if self
                .totp_service
                .verify_code(&secret, submitted_code.trim())?
            {
                tracing::info!(user_id = %credential.user_id, "TOTPコードで検証成功");
                return Ok(VerifyOutcome {
                    ok: true,
                    consumed_backup_code: false,
                });
            }
        }

        // どちらにも一致しなければ拒否。6桁数字を無条件に通すような
        // フォールバックは置かない
        tracing::warn!(user_id = %credential.user_id, "第二要素検証失敗");
        Ok(VerifyOutcome::rejected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_uppercases() {
        assert_eq!(normalize_backup_code("ab12cd34"), "AB12CD34");
    }

    #[test]
    fn test_normalize_strips_whitespace_and_hyphens() {
        assert_eq!(normalize_backup_code(" AB12-CD34 "), "AB12CD34");
        assert_eq!(normalize_backup_code("AB12 CD34"), "AB12CD34");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_backup_code("  - "), "");
    }

    #[test]
    fn test_outcome_rejected() {
        let outcome = VerifyOutcome::rejected();
        assert!(!outcome.ok);
        assert!(!outcome.consumed_backup_code);
    }
}
