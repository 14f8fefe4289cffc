pub mod settings;

pub use settings::{
    AlertChannelConfig, ApplicationConfig, BusinessConfig, CacheSettings, HealthConfig,
    MonitorConfig, MonitoringSettings,
};
