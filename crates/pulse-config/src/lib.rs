pub mod global;
pub mod loader;

pub use global::{
    AlertDefaults, BreakerDefaults, MetricsDefaults, PulseConfig, SloTarget, SystemConfig,
};
pub use loader::ConfigLoader;
