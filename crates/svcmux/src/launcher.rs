//! # Application Launching
//!
//! The seam between the broker and whatever starts applications. A launcher
//! turns an application URL into the near end of a control channel whose far
//! end that application is listening on.

use duplex::Handle;

/// Strong type for application identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AppUrl(String);

impl AppUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppUrl {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for AppUrl {
    fn from(url: String) -> Self {
        Self(url)
    }
}

impl From<&AppUrl> for AppUrl {
    fn from(url: &AppUrl) -> Self {
        url.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Nothing is registered under this URL.
    UnknownApplication(AppUrl),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownApplication(url) => write!(f, "Unknown application: {}", url),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Produces control channels to applications.
pub trait Launcher: Send + Sync + 'static {
    /// Returns the near end of a fresh control channel to `url`.
    ///
    /// Called with the Shell's cache entry for `url` locked; implementations
    /// must not call back into the Shell.
    fn launch(&self, url: &AppUrl) -> Result<Handle>;
}
