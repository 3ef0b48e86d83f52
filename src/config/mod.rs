pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::load_settings;
pub use paths::{default_config_path, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR};
pub use settings::{
    ApprovalSettings, ChannelConfig, DispatchSettings, EngineSettings, Monitoring,
    OutboundSettings, Settings, DEFAULT_HEARTBEAT_PROMPT,
};
