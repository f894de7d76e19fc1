#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The reactor was told to stop; its wait set is gone.
    #[error("event loop stopped")]
    Stopped,
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
