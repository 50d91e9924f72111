pub mod delete;
pub mod error;
pub mod files;
pub mod gallery;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod upload;

pub use error::{ServerError, ServerResult};
pub use routes::{create_router, AppState};
pub use server::{create_app_router, Server};
pub use snapvault_core::ServerConfig;
