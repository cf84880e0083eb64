pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::{create_collector_router, create_recs_router};
pub use state::{CollectorState, RecsState};
