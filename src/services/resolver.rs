//! 2FA要求リゾルバー
//!
//! セッション状態・永続化されたユーザー／デバイス状態・短命の検証マーカー
//! Cookieを、1つのアクセス判定に統合する状態機械。判定は毎回ゼロから評価
//! される（リクエストをまたぐキャッシュは持たない）

use uuid::Uuid;

use crate::error::AppError;
use crate::repositories::{TrustedDeviceRepository, TwoFactorCredentialRepository, UserRepository};

/// 2FA要求状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorRequirement {
    /// 2FA不要（終端 - 通過）
    NotRequired,
    /// チャレンジが必要
    RequiredUnverified,
    /// このブラウザセッションで検証済み（終端 - 通過）
    VerifiedThisSession,
    /// フラグは有効だが使用可能なクレデンシャルがない不整合状態。
    /// 強制するとユーザーを恒久的に締め出すため、警告ログ付きで通過扱い
    SetupIncomplete,
}

impl TwoFactorRequirement {
    /// この状態でアクセスを許可してよいか
    pub fn allows_access(self) -> bool {
        !matches!(self, Self::RequiredUnverified)
    }
}

/// 判定結果
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub requirement: TwoFactorRequirement,
    /// 信頼済みデバイス経路で通過したか（呼び出し側が last_used を更新する）
    pub trusted_device: bool,
}

/// 判定の純粋部分（入力が揃った後の順序付き評価）
///
/// * `credential_usable` - None: クレデンシャル行なし / Some(bool): シークレット有無
fn decide(
    two_factor_enabled: bool,
    credential_usable: Option<bool>,
    device_trusted: bool,
    has_verification_marker: bool,
) -> Resolution {
    if !two_factor_enabled {
        return Resolution {
            requirement: TwoFactorRequirement::NotRequired,
            trusted_device: false,
        };
    }
    match credential_usable {
        None | Some(false) => {
            return Resolution {
                requirement: TwoFactorRequirement::SetupIncomplete,
                trusted_device: false,
            };
        }
        Some(true) => {}
    }
    if device_trusted {
        return Resolution {
            requirement: TwoFactorRequirement::NotRequired,
            trusted_device: true,
        };
    }
    if has_verification_marker {
        return Resolution {
            requirement: TwoFactorRequirement::VerifiedThisSession,
            trusted_device: false,
        };
    }
    Resolution {
        requirement: TwoFactorRequirement::RequiredUnverified,
        trusted_device: false,
    }
}

/// 2FA要求リゾルバー
#[derive(Clone)]
pub struct RequirementResolver {
    user_repo: UserRepository,
    credential_repo: TwoFactorCredentialRepository,
    trusted_device_repo: TrustedDeviceRepository,
}

impl RequirementResolver {
    pub fn new(
        user_repo: UserRepository,
        credential_repo: TwoFactorCredentialRepository,
        trusted_device_repo: TrustedDeviceRepository,
    ) -> Self {
        Self {
            user_repo,
            credential_repo,
            trusted_device_repo,
        }
    }

    /// 既知ユーザーに対する2FA要求を判定
    ///
    /// 評価順序:
    /// 1. 2FAフラグ無効 → NotRequired
    /// 2. クレデンシャル不在または空シークレット → SetupIncomplete（警告）
    /// 3. (user_id, device_id) が信頼済み → NotRequired
    /// 4. 検証マーカーあり → VerifiedThisSession
    /// 5. それ以外 → RequiredUnverified
    pub async fn resolve(
        &self,
        user_id: Uuid,
        two_factor_enabled: bool,
        device_id: &str,
        has_verification_marker: bool,
    ) -> Result<Resolution, AppError> {
        if !two_factor_enabled {
            return Ok(decide(false, None, false, false));
        }

        let credential_usable = self
            .credential_repo
            .find_by_user_id(user_id)
            .await?
            .map(|c| c.has_usable_secret());

        if !matches!(credential_usable, Some(true)) {
            tracing::warn!(
                user_id = %user_id,
                "2FAフラグが有効だが使用可能なクレデンシャルがない（設定未完了として通過扱い）"
            );
            return Ok(decide(true, credential_usable, false, false));
        }

        let device_trusted = self
            .trusted_device_repo
            .find(user_id, device_id)
            .await?
            .is_some();

        Ok(decide(
            true,
            credential_usable,
            device_trusted,
            has_verification_marker,
        ))
    }

    /// セッション成立前（メールアドレスのみ判明）の2FA要求判定
    ///
    /// # Security
    /// ユーザー不在は NotRequired と同一の結果を返す。
    /// 応答の形からアカウントの存在有無を列挙できてはならない
    pub async fn resolve_for_email(
        &self,
        email: &str,
        device_id: &str,
    ) -> Result<Resolution, AppError> {
        match self.user_repo.find_by_email(email).await? {
            Some(user) => {
                // セッション前なので検証マーカーは存在しない
                self.resolve(user.id, user.two_factor_enabled, device_id, false)
                    .await
            }
            None => Ok(decide(false, None, false, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_required_when_flag_off() {
        let r = decide(false, Some(true), true, true);
        assert_eq!(r.requirement, TwoFactorRequirement::NotRequired);
        assert!(!r.trusted_device);
    }

    #[test]
    fn test_setup_incomplete_when_no_credential() {
        let r = decide(true, None, true, true);
        assert_eq!(r.requirement, TwoFactorRequirement::SetupIncomplete);
    }

    #[test]
    fn test_setup_incomplete_when_secret_empty() {
        let r = decide(true, Some(false), false, false);
        assert_eq!(r.requirement, TwoFactorRequirement::SetupIncomplete);
    }

    #[test]
    fn test_trusted_device_wins_over_marker() {
        let r = decide(true, Some(true), true, true);
        assert_eq!(r.requirement, TwoFactorRequirement::NotRequired);
        assert!(r.trusted_device);
    }

    #[test]
    fn test_marker_yields_verified_this_session() {
        let r = decide(true, Some(true), false, true);
        assert_eq!(r.requirement, TwoFactorRequirement::VerifiedThisSession);
    }

    #[test]
    fn test_required_unverified_otherwise() {
        let r = decide(true, Some(true), false, false);
        assert_eq!(r.requirement, TwoFactorRequirement::RequiredUnverified);
        assert!(!r.requirement.allows_access());
    }

    #[test]
    fn test_allows_access() {
        assert!(TwoFactorRequirement::NotRequired.allows_access());
        assert!(TwoFactorRequirement::VerifiedThisSession.allows_access());
        assert!(TwoFactorRequirement::SetupIncomplete.allows_access());
        assert!(!TwoFactorRequirement::RequiredUnverified.allows_access());
    }
}
