pub mod config;
pub mod logging;
pub mod paths;

pub use config::{
    Config, ConfigError, LogLevel, LoggingConfig, RelayConfig, RuntimeConfig, SourceSettings,
    ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "siphon";
pub const APP_AUTHOR: &str = "Siphon";
pub const APP_QUALIFIER: &str = "io";
