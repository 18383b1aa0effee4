//! Error taxonomy shared by the resolver, component and repository layers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration key, section or value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An absolute URL was given for an archive but it does not serve any content.
    #[error("the archive uri is not reachable: {url}")]
    UnreachableUrl { url: String },

    /// A packaging precondition failed (unsafe path, existing target, repogen failure).
    #[error("{0}")]
    Packaging(String),

    /// A component named an archive server that is not registered.
    #[error("archive server not found: {0}")]
    ServerNotFound(String),

    /// A release task section could not be interpreted.
    #[error("release task error: {0}")]
    ReleaseTask(String),

    #[error("command `{cmd}` failed: {message}")]
    Command { cmd: String, message: String },

    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("i/o error on {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Path {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn packaging(message: impl Into<String>) -> Self {
        Error::Packaging(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}
