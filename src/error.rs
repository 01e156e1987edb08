use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ByteminerError {
    #[error("Cannot open stream '{path}': {reason}")]
    StreamOpen { path: PathBuf, reason: String },

    #[error("Stream failed: {0}")]
    StreamFailed(String),

    #[error("Cannot load library '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("Symbol '{symbol}' unavailable in '{path}': {reason}")]
    Symbol {
        path: String,
        symbol: String,
        reason: String,
    },

    #[error("Miner '{symbol}' rejected its configuration: {reason}")]
    Config { symbol: String, reason: String },

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Miner '{miner}' failed: {source}")]
    Plugin {
        miner: String,
        #[source]
        source: MinerFault,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Coarse classification of [`ByteminerError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StreamOpen,
    StreamFailed,
    Load,
    Symbol,
    Config,
    Argument,
    Plugin,
    Io,
    Other,
}

impl ByteminerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ByteminerError::StreamOpen { .. } => ErrorKind::StreamOpen,
            ByteminerError::StreamFailed(_) => ErrorKind::StreamFailed,
            ByteminerError::Load { .. } => ErrorKind::Load,
            ByteminerError::Symbol { .. } => ErrorKind::Symbol,
            ByteminerError::Config { .. } => ErrorKind::Config,
            ByteminerError::Argument(_) => ErrorKind::Argument,
            ByteminerError::Plugin { .. } => ErrorKind::Plugin,
            ByteminerError::Io(_) => ErrorKind::Io,
            ByteminerError::Anyhow(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn load(path: impl Into<String>, reason: impl ToString) -> Self {
        ByteminerError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Error a miner reports from inside its scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MinerFault(pub String);

impl MinerFault {
    pub fn new(reason: impl Into<String>) -> Self {
        MinerFault(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, ByteminerError>;
