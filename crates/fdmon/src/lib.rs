// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Engines and workload driver for benchmarking file descriptor readiness monitoring.
//!
//! This crate measures how efficiently different Linux facilities detect readiness on many file
//! descriptors at once. Every facility is wrapped in an [`Engine`] that echoes back whatever it
//! reads from its descriptors, and a single-threaded [`Generator`] drives synchronous
//! request/response traffic through them, counting round trips.
//!
//! The available backends are:
//!
//! - `epoll` - readiness list, optionally with exclusive wakeups;
//! - `poll` - per-descriptor result flags;
//! - `select` - descriptor sets rebuilt before every wait, limited to `FD_SETSIZE`;
//! - `io_uring` - one-shot poll submissions re-armed after every event, optionally exclusive;
//! - `threads` - one blocking worker thread per descriptor, no notification mechanism.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use fdmon::{CancellationToken, Config, EngineKind};
//!
//! let config = Config::builder()
//!     .with_engine(EngineKind::Epoll)
//!     .with_num_engines(4)
//!     .with_num_fds(8)
//!     .with_exclusive(true)
//!     .with_duration(Duration::from_secs(5))
//!     .build()?;
//!
//! let report = fdmon::run(&config, &CancellationToken::new())?;
//! report.stats().write_csv(std::io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Shutdown
//!
//! Engines are destroyed by dropping them. Dropping raises the engine's stop signal and joins its
//! worker threads before any descriptor it monitors can be closed; the engines hold shared
//! ownership of the engine-side endpoints so the channel pairs outlive every engine watching them.

mod cancel;
mod channel;
mod config;
mod coordinator;
mod deadline;
mod engine;
mod error;
mod generator;
mod interrupt;
mod stats;
mod stop_signal;
mod sys;

pub use cancel::*;
pub use channel::*;
pub use config::*;
pub use coordinator::*;
pub use deadline::*;
pub use engine::*;
pub use error::*;
pub use generator::*;
pub use interrupt::*;
pub use stats::*;
