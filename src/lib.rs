pub mod app;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod cloud;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod local;
pub mod models;
pub mod state;
pub mod stats;
pub mod storage;
pub mod streak;

pub use app::router;
pub use cloud::{CloudApi, CloudStore, HttpCloudClient};
pub use coordinator::{Coordinator, DataSource, LoginOutcome, Session, SharedCoordinator};
pub use state::AppState;
pub use storage::{load_data, resolve_data_path};
