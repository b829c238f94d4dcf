// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod epoll;
mod poll;
mod select;
mod threads;
mod uring;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

pub use epoll::*;
pub use poll::*;
pub use select::*;
pub use threads::*;
pub use uring::*;
pub(crate) use worker::*;

use crate::{Config, EngineEndpoint, Error, Result};

/// A descriptor monitoring mechanism that can create [`Engine`] instances.
///
/// Each implementation is a stateless singleton reachable through [`EngineKind::backend()`].
///
/// # Thread safety
///
/// Implementations are thread-safe.
#[cfg_attr(test, mockall::automock)]
pub trait Backend: Debug + Send + Sync {
    /// The canonical name of the backend, as accepted by [`EngineKind::from_str`].
    fn name(&self) -> &'static str;

    /// Whether the backend can wake only one of several engine instances watching the same
    /// descriptor.
    fn supports_exclusive(&self) -> bool;

    /// Starts an engine watching `endpoints`.
    ///
    /// Returns only once the engine's worker is about to wait for readiness, so the engine can be
    /// destroyed immediately without losing the stop request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedExclusive`] before acquiring anything if `config` requests
    /// exclusive wakeups this backend cannot provide, a configuration error if the descriptors
    /// do not fit the mechanism and [`Error::Resource`] if any resource cannot be acquired. On
    /// error, everything acquired so far has been released.
    fn create(&self, config: &Config, endpoints: &[EngineEndpoint]) -> Result<Box<dyn Engine>>;
}

/// A running engine instance: a worker (or several) echoing whatever arrives on its endpoints.
///
/// Dropping the engine destroys it: the worker is asked to stop, joined, and every resource the
/// engine owns is released. [`Engine::destroy()`] spells the same thing out explicitly.
pub trait Engine: Debug + Send {
    /// The canonical name of the backend that created this engine.
    fn name(&self) -> &'static str;

    /// How many worker threads this engine runs.
    fn worker_count(&self) -> usize;

    /// Stops the engine, joins its workers and releases its resources.
    fn destroy(self: Box<Self>) {
        drop(self);
    }
}

/// Selects one of the available backends.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum EngineKind {
    /// Readiness list (`epoll`).
    Epoll,

    /// Per-descriptor result flags (`poll`).
    Poll,

    /// Descriptor sets rebuilt before every wait (`select`).
    #[default]
    Select,

    /// One-shot poll submissions on a completion queue (`io_uring`).
    IoUring,

    /// One blocking thread per descriptor.
    Threads,
}

/// Every backend, in registry order. Indexed by `EngineKind as usize`.
static BACKENDS: [&dyn Backend; 5] = [
    &EpollBackend,
    &PollBackend,
    &SelectBackend,
    &IoUringBackend,
    &ThreadsBackend,
];

impl EngineKind {
    /// Every engine kind, in registry order.
    pub const ALL: [Self; 5] = [
        Self::Epoll,
        Self::Poll,
        Self::Select,
        Self::IoUring,
        Self::Threads,
    ];

    /// The backend implementing this kind.
    #[must_use]
    pub fn backend(self) -> &'static dyn Backend {
        BACKENDS[self as usize]
    }

    /// The canonical name, as used on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Epoll => "epoll",
            Self::Poll => "poll",
            Self::Select => "select",
            Self::IoUring => "io_uring",
            Self::Threads => "threads",
        }
    }

    /// The descriptive alias, also accepted by [`EngineKind::from_str`].
    #[must_use]
    pub const fn alias(self) -> &'static str {
        match self {
            Self::Epoll => "readiness-list",
            Self::Poll => "bitmask-poll",
            Self::Select => "set-poll",
            Self::IoUring => "completion-queue",
            Self::Threads => "thread-per-fd",
        }
    }

    /// Whether the backend supports exclusive wakeups.
    #[must_use]
    pub fn supports_exclusive(self) -> bool {
        self.backend().supports_exclusive()
    }
}

impl Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s || kind.alias() == s)
            .ok_or_else(|| Error::UnknownEngine(s.to_string()))
    }
}

/// Rejects exclusive wakeups for backends that cannot provide them.
pub(crate) fn ensure_exclusive_supported(backend: &dyn Backend, config: &Config) -> Result<()> {
    if config.exclusive() && !backend.supports_exclusive() {
        return Err(Error::UnsupportedExclusive {
            engine: backend.name(),
        });
    }

    Ok(())
}

/// Allocates the per-engine message buffer, reporting allocation failure as an error.
pub(crate) fn message_buffer(size: usize) -> Result<Box<[u8]>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(size).map_err(|e| {
        Error::resource(
            "out of memory allocating message buffer",
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, e),
        )
    })?;
    buffer.resize(size, 0);

    Ok(buffer.into_boxed_slice())
}
