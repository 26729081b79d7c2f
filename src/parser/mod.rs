pub mod auth_config;
pub mod host;
pub mod ssh;
pub mod version;
