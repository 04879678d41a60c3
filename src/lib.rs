pub mod config;
pub mod context;
pub mod cycles;
pub mod db;
pub mod error;
pub mod models;
pub mod report;

pub use config::{ContextConfig, CycleConfig};
pub use context::HealthContextAssembler;
pub use error::HealthError;
