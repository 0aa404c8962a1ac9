pub mod chrome;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod output;
pub mod policy;
pub mod report;
pub mod timeouts;
pub mod utils;

pub use config::{Config, PolicyConfig, ScanOptions};
pub use engine::{EngineEvent, EngineSettings, RenderingEngine, RequestControl, Verdict};
pub use error::ScanError;
pub use orchestrator::ScanOrchestrator;
pub use report::ScanReport;

pub type Result<T> = std::result::Result<T, ScanError>;
