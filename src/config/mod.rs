pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_global_settings, load_settings};
pub use paths::{
    default_global_config_path, default_state_root_path, ARTIFACTS_DIR_NAME, DATABASE_FILE_NAME,
    GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR,
};
pub use settings::{
    AgentSettings, NotificationSettings, PresentationSettings, Settings,
    SlackNotificationSettings, StaleRunSettings, STALE_RUN_TIMEOUT_FLOOR_SECONDS,
};
