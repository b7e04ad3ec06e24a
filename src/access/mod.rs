//! The facade callers use: look up the active credential, turn it into a
//! usable session, and store new ones.

mod device_login;
mod manager;
mod validator;

pub use device_login::DeviceCodeLogin;
pub use manager::{AccessManager, Established};
pub use validator::ensure_usable;
