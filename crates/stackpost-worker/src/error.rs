use std::path::PathBuf;

/// Errors starting a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors reading or writing image files.
#[derive(Debug, thiserror::Error)]
pub enum ImageIoError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}
