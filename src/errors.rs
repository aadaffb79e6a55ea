use std::fmt;
use thiserror::Error;

/// Step of a backup run an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dump,
    Compress,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dump => "dump",
            Stage::Compress => "compress",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backup of '{target}' failed at {stage} stage: {message}")]
    Backup {
        target: String,
        stage: Stage,
        message: String,
    },

    #[error("Upload of '{key}' to bucket '{bucket}' failed: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Backup of '{target}' cancelled during {stage} stage")]
    Cancelled { target: String, stage: Stage },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    /// `target` names what was being backed up: the database inside a run,
    /// the source file for a standalone compression.
    pub fn backup(target: &str, stage: Stage, message: impl Into<String>) -> Self {
        AppError::Backup {
            target: target.to_string(),
            stage,
            message: message.into(),
        }
    }

    pub fn cancelled(target: &str, stage: Stage) -> Self {
        AppError::Cancelled {
            target: target.to_string(),
            stage,
        }
    }

    pub fn upload(bucket: &str, key: &str, message: impl Into<String>) -> Self {
        AppError::Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Re-labels a stage failure with the database it belongs to.
    pub fn retarget(self, target: &str) -> Self {
        match self {
            AppError::Backup { stage, message, .. } => AppError::backup(target, stage, message),
            AppError::Cancelled { stage, .. } => AppError::cancelled(target, stage),
            other => other,
        }
    }

    /// Stage the failure belongs to, if it happened inside a run.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AppError::Backup { stage, .. } | AppError::Cancelled { stage, .. } => Some(*stage),
            AppError::Upload { .. } => Some(Stage::Upload),
            AppError::Config(_) | AppError::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
