pub mod bootstrap;
pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod constant;
pub mod engine;
pub mod error;
pub mod rbac;
pub mod registry;
pub mod role;
pub mod server;
pub mod wire;

pub use bootstrap::spawn;
pub use client::BoxClient;
pub use config::{BoxConfig, RoleSpec, Source, SourceMode};
pub use error::{Error, Result};
pub use wire::params::Cell;
