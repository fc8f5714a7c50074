/// Sets up the global `tracing` subscriber with console and rolling file output.
pub mod logger_tracing;

pub use logger_tracing::{level_directive, setup_logging};
