pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod state;
pub mod storage;
pub mod summary;
pub mod ui;

pub use app::router;
pub use config::Config;
pub use state::AppState;
