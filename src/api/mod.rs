pub mod cache;
pub mod routes;

pub use cache::ResponseCache;
pub use routes::{create_router, AppState};
