pub mod api;
pub mod interceptor;
pub mod server;

pub use api::AppState;
pub use interceptor::access_interceptor;
pub use server::{build_router, run_server};
