mod router;
mod state;

pub use router::{build_router, cors_layer};
pub use state::{HealthSnapshot, ServeHealth, ServeState};
