//! Error types for the report pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid mask '{mask}': {reason}")]
    Mask { mask: String, reason: String },

    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("pipeline {0} thread panicked")]
    ThreadPanicked(&'static str),

    #[error("pipeline is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
