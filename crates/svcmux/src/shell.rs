//! # Shell
//!
//! The per-process cache of application connections. The Shell owns one
//! ServiceProvider per application URL, created on first use through a
//! `Launcher`, and tears them all down on `close`.
//!
//! Uses DashMap so lookups for different applications do not contend on a
//! global lock.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use duplex::MessageHandler;

use crate::config::Config;
use crate::interface::Interface;
use crate::launcher;
use crate::launcher::AppUrl;
use crate::launcher::Launcher;
use crate::service_provider;
use crate::service_provider::ServiceProvider;

#[derive(Debug)]
pub enum Error {
    Launch(launcher::Error),
    Service(service_provider::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Launch(e) => write!(f, "Launch error: {}", e),
            Self::Service(e) => write!(f, "Service error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Launch(e) => Some(e),
            Self::Service(e) => Some(e),
        }
    }
}

impl From<launcher::Error> for Error {
    fn from(e: launcher::Error) -> Self {
        Self::Launch(e)
    }
}

impl From<service_provider::Error> for Error {
    fn from(e: service_provider::Error) -> Self {
        Self::Service(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cache of ServiceProviders keyed by application URL.
pub struct Shell {
    launcher: Arc<dyn Launcher>,
    config: Config,
    applications: DashMap<AppUrl, ServiceProvider>,
}

impl Shell {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self::with_config(launcher, Config::default())
    }

    pub fn with_config(launcher: Arc<dyn Launcher>, config: Config) -> Self {
        Self {
            launcher,
            config,
            applications: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the provider for `url`, launching the application on first use.
    ///
    /// A cached provider whose control channel has since died is replaced.
    pub fn connect_to_application(&self, url: impl Into<AppUrl>) -> Result<ServiceProvider> {
        let url = url.into();

        let provider = match self.applications.entry(url) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                tracing::info!(url = %entry.key(), "cached application closed, relaunching");
                let provider = self.launch(entry.key())?;
                entry.insert(provider.clone());
                provider
            }
            Entry::Vacant(entry) => {
                let provider = self.launch(entry.key())?;
                entry.insert(provider.clone());
                provider
            }
        };

        Ok(provider)
    }

    /// Connects to service `I` of the application at `url`.
    pub fn connect_to_service<I: Interface>(
        &self,
        url: impl Into<AppUrl>,
        client: Option<Arc<dyn MessageHandler>>,
    ) -> Result<I::Proxy> {
        let provider = self.connect_to_application(url)?;
        Ok(provider.connect_to_service::<I>(client)?)
    }

    /// Closes every cached provider and empties the cache.
    ///
    /// The Shell stays usable; later connects launch afresh.
    pub fn close(&self) {
        let mut closing = Vec::new();
        self.applications.retain(|_, provider| {
            closing.push(provider.clone());
            false
        });

        let count = closing.len();
        for provider in closing {
            provider.close();
        }
        tracing::info!(applications = count, "shell closed");
    }

    /// Number of cached applications.
    pub fn applications(&self) -> usize {
        self.applications.len()
    }

    fn launch(&self, url: &AppUrl) -> Result<ServiceProvider> {
        let control = self.launcher.launch(url)?;
        let provider = ServiceProvider::with_config(control, self.config.clone());
        tracing::debug!(url = %url, provider = %provider.id(), "connected to application");
        Ok(provider)
    }
}
