use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecolorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("page {page} is not a dictionary")]
    MalformedPage { page: u32 },

    /// Only reachable if a rule injects text outside the Latin-1 range.
    #[error("character {ch:?} at offset {offset} has no Latin-1 encoding")]
    Encoding { ch: char, offset: usize },
}

pub type Result<T> = std::result::Result<T, RecolorError>;
