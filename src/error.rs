use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

/// `Frame` and `Domain` are fatal to the server's dispatch loop; `Engine`
/// and `Constraint` are ordinary call failures surfaced to a waiting
/// client without killing the child.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("domain error: {0}")]
    Domain(String),

    #[error("sqlite error {code}: {message}")]
    Engine { code: i32, message: String },

    #[error("constraint violation")]
    Constraint,

    #[error("server process exited or the connection was closed")]
    ServerGone,

    #[error("a bug in sqlbox: {0}")]
    LibraryBug(color_eyre::Report),
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

impl Error {
    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::LibraryBug(eyre!(format!("{:#?}", err)))
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }
}
