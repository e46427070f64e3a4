#![forbid(unsafe_code)]

pub mod app;
pub mod compile;
pub mod config;
pub mod connector;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod notify;
pub mod response;
pub mod secrets;
pub mod settings;
pub mod target;
pub mod telemetry;
pub mod value;

pub use error::DeployerError;
pub use response::Response;
pub use settings::Settings;
