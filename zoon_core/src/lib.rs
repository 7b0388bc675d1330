pub mod bits;
pub mod config;
pub mod error;
pub mod runner;
pub mod zoon;

pub use config::ZoonConfig;
pub use error::ZoonError;
pub use runner::{Launch, RunResult, Runner, RunnerConfig, StatusKind};
pub use zoon::Zoon;
