pub mod api;
pub mod session;

pub use api::{serve, AppState};
