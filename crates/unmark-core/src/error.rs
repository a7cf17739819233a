use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnmarkError {
    #[error("Failed to open PDF: {0}")]
    Open(String),

    #[error("Failed to read page: {0}")]
    Page(String),

    #[error("Failed to delete object: {0}")]
    Delete(String),

    #[error("Failed to save PDF: {0}")]
    Save(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
