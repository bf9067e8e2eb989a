pub use mailroom_macros::HttpError;

pub mod auth;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod request;
pub mod serve;
pub mod store;

pub use config::{EnvConfig, Settings};
pub use serve::serve;
