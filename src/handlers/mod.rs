pub mod devices;
pub mod health;
pub mod login;
pub mod logout;
pub mod magic_link;
pub mod oauth;
pub mod two_factor;

pub use devices::{debug_device, list_devices, remove_device};
pub use health::health_check;
pub use login::login;
pub use logout::logout;
pub use magic_link::{consume_magic_link, request_magic_link};
pub use oauth::oauth_callback;
pub use two_factor::{activate_2fa, challenge_2fa, challenge_context, disable_2fa, setup_2fa};
