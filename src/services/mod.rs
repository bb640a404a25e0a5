pub mod auth;
pub mod email;
pub mod fingerprint;
pub mod magic_link;
pub mod resolver;
pub mod session;
pub mod session_cookies;
pub mod totp;
pub mod verifier;

pub use auth::AuthService;
pub use email::EmailService;
pub use fingerprint::ClientMeta;
pub use magic_link::MagicLinkService;
pub use resolver::{RequirementResolver, Resolution, TwoFactorRequirement};
pub use session::{SessionClient, SessionInfo};
pub use session_cookies::{PendingOAuthChallenge, SessionCookies};
pub use totp::TotpService;
pub use verifier::{SecondFactorVerifier, VerifyOutcome};
