pub mod config;

pub use config::OrchestraConfig;
