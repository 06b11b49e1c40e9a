use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid byte range '{0}', expected <start>-<end>")]
    InvalidRange(String),

    #[error("No cached data for {0}")]
    NotCached(String),
}

pub type Result<T> = anyhow::Result<T>;
