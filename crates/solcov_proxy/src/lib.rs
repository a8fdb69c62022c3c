//! The intercepting JSON-RPC proxy: forwards all traffic to the real node,
//! recognizes state-changing and call methods, and schedules asynchronous
//! trace jobs whose results are attributed back to registered artifacts.

mod dispatcher;
mod intercept;
pub mod queue;
mod server;
mod state;

pub use queue::{Job, JobQueue};
pub use server::{serve, serve_on};
pub use state::{AppState, Config, ProxyError};
