pub mod magic_link_token;
pub mod trusted_device;
pub mod two_factor_credential;
pub mod user;

pub use magic_link_token::MagicLinkTokenRepository;
pub use trusted_device::TrustedDeviceRepository;
pub use two_factor_credential::TwoFactorCredentialRepository;
pub use user::UserRepository;
