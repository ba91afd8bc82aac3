pub mod adapters;
pub mod assistant;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod db;
pub mod dialog;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod router;
pub mod runtime_paths;
pub mod scheduler;
pub mod seo;
pub mod users;

pub type Result<T> = std::result::Result<T, error::AvaBotError>;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_SHA: &str = env!("AVA_GIT_SHA");

pub fn version_string() -> String {
    format!("{VERSION}+{GIT_SHA}")
}
