use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MicronixErr>;

#[derive(Error, Debug)]
pub enum MicronixErr {
    /// The remote end went away or was never reachable. Fatal to the run.
    #[error("transport unreachable: {0}")]
    Transport(String),

    /// A reconnaissance command produced output we could not make sense of.
    /// Fatal for the identity, user, group and executable steps; the
    /// remaining steps log it and continue with an empty field.
    #[error("could not parse output of `{command}`: {reason}")]
    Parse { command: String, reason: String },

    /// A capability or CVE catalog is missing or structurally invalid.
    #[error("capability catalog error: {0}")]
    Catalog(String),

    /// The reference PDDL domain file could not be understood.
    #[error("invalid PDDL domain: {0}")]
    Domain(String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl MicronixErr {
    pub(crate) fn parse(command: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}
