pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod telemetry;

pub use config::{ConfigError, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use router::create_router;
pub use state::RelayState;
