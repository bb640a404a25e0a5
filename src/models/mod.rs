pub mod magic_link_token;
pub mod trusted_device;
pub mod two_factor_credential;
pub mod user;

pub use magic_link_token::MagicLinkToken;
pub use trusted_device::TrustedDevice;
pub use two_factor_credential::TwoFactorCredential;
pub use user::User;
