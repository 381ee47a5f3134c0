//! # In-process applications
//!
//! A `Launcher` whose applications live in the same process. Each
//! application registers an entry point; every launch opens a channel pair,
//! hands the entry point a ServiceProvider over the far end and returns the
//! near end to the caller.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use dashmap::DashMap;
use duplex::Handle;

use crate::config::Config;
use crate::launcher::AppUrl;
use crate::launcher::Error;
use crate::launcher::Launcher;
use crate::launcher::Result;
use crate::service_provider::ServiceProvider;

type EntryPoint = Arc<dyn Fn(&ServiceProvider) + Send + Sync>;

/// Launches applications registered in this process.
pub struct LocalLauncher {
    config: Config,
    entry_points: DashMap<AppUrl, EntryPoint>,
    /// Application-side providers. Kept alive here because nothing else is
    /// required to hold them.
    running: Mutex<Vec<(AppUrl, ServiceProvider)>>,
}

impl LocalLauncher {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            entry_points: DashMap::new(),
            running: Mutex::new(Vec::new()),
        }
    }

    /// Registers the entry point for `url`, replacing any previous one.
    ///
    /// The entry point typically calls `provide_service` on the provider it
    /// is given. It runs once per launch.
    pub fn register<F>(&self, url: impl Into<AppUrl>, entry_point: F) -> &Self
    where
        F: Fn(&ServiceProvider) + Send + Sync + 'static,
    {
        self.entry_points.insert(url.into(), Arc::new(entry_point));
        self
    }

    /// Application-side providers for `url` that are still open.
    pub fn instances(&self, url: &AppUrl) -> Vec<ServiceProvider> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(running, provider)| running == url && !provider.is_closed())
            .map(|(_, provider)| provider.clone())
            .collect()
    }

    /// Closes every application-side provider.
    pub fn close(&self) {
        let running = std::mem::take(&mut *self.running.lock().unwrap_or_else(PoisonError::into_inner));
        for (_, provider) in running {
            provider.close();
        }
    }
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher for LocalLauncher {
    fn launch(&self, url: &AppUrl) -> Result<Handle> {
        let entry_point = self
            .entry_points
            .get(url)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownApplication(url.clone()))?;

        let (near, far) = duplex::open_pair();
        let provider = ServiceProvider::with_config(far, self.config.clone());
        entry_point(&provider);

        tracing::info!(url = %url, provider = %provider.id(), "application launched");

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.retain(|(_, provider)| !provider.is_closed());
        running.push((url.clone(), provider));

        Ok(near)
    }
}
