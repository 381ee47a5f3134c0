//! # svcmux
//!
//! A broker that lets applications find and connect to each other's named
//! services over point-to-point duplex channels, with no central registry.
//!
//! ## Architecture
//!
//! - **Connection**: a channel endpoint bound to a local delegate.
//! - **ServiceProvider**: multiplexes named connect requests over one control
//!   channel; buffers requests that arrive before their provider.
//! - **Shell**: caches one ServiceProvider per application URL.

pub mod config;
pub mod connection;
pub mod control;
pub mod interface;
pub mod launcher;
pub mod local;
pub mod registry;
pub mod service_provider;
pub mod shell;

pub use config::Config;
pub use connection::Connection;
pub use interface::Interface;
pub use interface::ServiceFactory;
pub use launcher::AppUrl;
pub use launcher::Launcher;
pub use local::LocalLauncher;
pub use service_provider::ServiceProvider;
pub use shell::Shell;
