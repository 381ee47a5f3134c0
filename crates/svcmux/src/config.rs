//! Broker configuration.

/// Pending handles kept per service name when no limit is given.
pub const DEFAULT_PENDING_LIMIT: usize = 64;

/// Settings shared by every ServiceProvider a Shell or launcher creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on connect requests buffered for one unregistered service
    /// name. Requests beyond it are refused by closing their handle.
    pub pending_limit: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            pending_limit: DEFAULT_PENDING_LIMIT,
        }
    }

    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
