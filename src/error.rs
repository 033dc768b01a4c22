use thiserror::Error;

/// Configuration errors surfaced to the caller. Contract violations
/// (deleting an unknown flow, loop metadata scanning past the script) are
/// panics instead: they are unreachable through correct use and there is no
/// defined way to continue from them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid flow script: {0}")]
    BadConfig(String),

    #[error("unrecognized connection pattern value {0}")]
    BadPattern(u32),

    #[error("flow script parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
