pub mod admins;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hierarchy;
pub mod models;
pub mod promotions;
pub mod registrations;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod workflow;

pub use error::{ServiceError, ServiceResult};
pub use state::AppState;
