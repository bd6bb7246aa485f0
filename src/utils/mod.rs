pub mod logging;

// Re-export common functions and types
pub use logging::init_logging;
