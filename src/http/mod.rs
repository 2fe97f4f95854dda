//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, body limit)
//!     → request.rs (caller IP, request ID, user agent)
//!     → routing::ListenerRoutes (service for this path)
//!     → pipeline (stages, proxy)
//!     → response.rs (synthetic responses, Location rewrite)
//!     → websocket.rs (upgrade bridging)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::HttpServer;
