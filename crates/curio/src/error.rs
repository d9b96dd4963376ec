//! Error types for the curation engine

use std::io;
use thiserror::Error;

/// Curation error type
#[derive(Error, Debug)]
pub enum CurateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Unknown category '{category}' for format '{format}'")]
    UnknownCategory { format: String, category: String },

    #[error("Subject Id could not be determined from '{0}'")]
    InvalidSubject(String),

    #[error("Session Id could not be determined from '{0}'")]
    InvalidSession(String),

    #[error("{0} Id is locked")]
    Locked(&'static str),

    #[error("Destination name already exists: {0}")]
    NameCollision(String),

    #[error("Recording has no loaded file")]
    NoCurrentFile,

    #[error("Malformed ruleset: {0}")]
    MalformedRuleSet(String),

    #[error("Invalid pattern for attribute '{attribute}': {message}")]
    Pattern { attribute: String, message: String },
}

/// Template resolution error; aborts the enclosing operation.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("closing '{seek}' not found in '{template}'")]
    Unterminated { template: String, seek: &'static str },

    #[error("unknown namespace '{0}'")]
    UnknownNamespace(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' cannot be applied to {value}: {message}")]
    InvalidAction {
        action: String,
        value: String,
        message: String,
    },

    #[error("no entity label bound for '{0}'")]
    UnknownLabel(String),

    #[error("no custom value set for '{0}'")]
    UnknownCustom(String),

    #[error("no tabular value for '{0}'")]
    UnknownTabular(String),

    #[error("unknown characteristic '{0}'")]
    UnknownCharacteristic(String),

    #[error("malformed format spec '{0}'")]
    BadFormatSpec(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CurateError>;
