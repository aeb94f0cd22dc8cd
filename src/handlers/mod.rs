mod command;
mod health;
mod telemetry;

pub use command::*;
pub use health::*;
pub use telemetry::*;
