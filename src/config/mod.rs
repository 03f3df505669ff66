/// Database connection and schema creation
pub mod database;

/// Settings loading from `mentor_booking.toml` and the environment
pub mod settings;

/// Static user directory built from the settings file
pub mod users;

pub use settings::{load_settings, Settings, DEFAULT_CONFIG_PATH};
