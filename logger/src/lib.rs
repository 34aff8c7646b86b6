pub mod logger;

pub use logger::{LogLevel, Logger};
