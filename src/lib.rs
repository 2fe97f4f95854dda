//! Guardian: reverse proxy, request filter and process supervisor.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod proxy;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod storage;
pub mod supervisor;

pub use config::schema::GuardianConfig;
pub use error::GuardianError;
pub use gateway::{Gateway, RunningGateway};
pub use lifecycle::Shutdown;
