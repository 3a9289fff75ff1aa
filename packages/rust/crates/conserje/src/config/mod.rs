//! Runtime configuration loading and merging.

mod settings;

pub use settings::{
    load_runtime_settings, load_runtime_settings_from_paths, runtime_settings_paths,
    set_config_home_override, EngineSettings, FactsSettings, LockSettings, OutboundSettings,
    QueueSettings, RuntimeSettings, ServerSettings, StoreSettings, TranscriptSettings,
    TurnSettings,
};
