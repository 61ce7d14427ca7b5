use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum VendoError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing distance sensor")]
    MissingSensor,
    #[error("missing pump actuator")]
    MissingPump,
    #[error("missing valve actuator")]
    MissingValve,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
