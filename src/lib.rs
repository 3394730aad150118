pub mod builtin;
pub mod config;
pub mod error;
pub mod host;
pub mod instance;
pub mod ipc;
pub mod lifecycle;
pub mod plugin;
pub mod resolver;
pub mod store;
pub mod validator;

pub use error::LifecycleError;
pub use lifecycle::LifecycleCoordinator;
