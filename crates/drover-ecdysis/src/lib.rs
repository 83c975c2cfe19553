//! # drover-ecdysis
//!
//! Process-level plumbing shared by the Drover supervisor and its binary,
//! following the [Cloudflare Ecdysis pattern](https://blog.cloudflare.com/ecdysis-rust-graceful-restarts/).
//!
//! ## Overview
//!
//! - [`ListenerSet`] adopts listening sockets passed in by a parent process or
//!   by systemd socket activation, so a supervisor can come up without ever
//!   closing the public port.
//! - [`DrainTracker`] counts in-flight work with RAII guards, so a worker can
//!   report how many requests a drain or a kill cut short.
//! - [`Signals`] maps Unix signals onto supervisor intents.
//!
//! ## Signal Conventions
//!
//! - `SIGTERM`: Graceful shutdown (drain in-flight requests, then exit)
//! - `SIGINT` / `SIGQUIT`: Quick shutdown (abort in-flight requests)
//! - `SIGHUP`: Rolling reload of the worker generation
//!
//! ## Environment Variables
//!
//! - `LISTEN_FDS`: Number of inherited file descriptors (starting at fd 3)
//! - `LISTEN_FD_NAMES`: Colon-separated names for each inherited fd
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other platforms.

#[cfg(not(unix))]
compile_error!("drover-ecdysis requires a Unix platform (Linux or macOS)");

mod drain;
mod listener;
mod signals;

pub use drain::{DrainTracker, InFlight};
pub use listener::{InheritError, ListenerSet};
pub use signals::{Signal, Signals};
