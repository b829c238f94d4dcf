// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// A specialized `Result` type for benchmark operations
/// that return a benchmark [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the benchmark core.
///
/// Use [`Error::kind()`] to tell configuration mistakes (nothing was created), resource failures
/// (everything acquired so far has been released again) and I/O faults of the workload apart.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No engine is registered under the given name.
    #[error("unknown engine {0:?}")]
    UnknownEngine(String),

    /// A numeric option was zero.
    #[error("invalid {option}: must be greater than zero")]
    InvalidOption {
        /// The name of the rejected option, as spelled on the command line.
        option: &'static str,
    },

    /// Exclusive wakeups were requested from an engine that cannot provide them.
    #[error("{engine} engine does not support exclusive=1")]
    UnsupportedExclusive {
        /// The canonical name of the engine.
        engine: &'static str,
    },

    /// A descriptor does not fit into the fixed-capacity descriptor set of an engine.
    #[error("maximum number of fds exceeded for {engine} engine (fd {fd} is not below {limit})")]
    CapacityExceeded {
        /// The canonical name of the engine.
        engine: &'static str,

        /// The offending descriptor.
        fd: RawFd,

        /// The exclusive upper bound on descriptor numbers.
        limit: usize,
    },

    /// The operating system refused to hand out a resource (memory, descriptor, thread, ...).
    #[error("{context}")]
    Resource {
        /// What was being acquired.
        context: &'static str,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// The workload generator transferred a different number of bytes than a full message.
    #[error("{operation} failed after {transferred} of {expected} bytes")]
    IoFault {
        /// `"read"` or `"write"`.
        operation: &'static str,

        /// The message size.
        expected: usize,

        /// How many bytes were actually transferred.
        transferred: usize,

        /// The underlying operating system error, if the call failed outright.
        #[source]
        source: Option<io::Error>,
    },
}

/// Broad classification of an [`Error`][enum@Error], deciding how far rollback went.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The configuration was rejected before any resource was created.
    Configuration,

    /// Creating a resource failed; everything acquired up to that point has been released.
    Resource,

    /// The workload ended early because of an unexpected transfer size.
    IoFault,
}

impl Error {
    pub(crate) const fn resource(context: &'static str, source: io::Error) -> Self {
        Self::Resource { context, source }
    }

    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownEngine(_)
            | Self::InvalidOption { .. }
            | Self::UnsupportedExclusive { .. }
            | Self::CapacityExceeded { .. } => ErrorKind::Configuration,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::IoFault { .. } => ErrorKind::IoFault,
        }
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert_eq!(
            Error::UnknownEngine("bogus".to_string()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::UnsupportedExclusive { engine: "select" }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::CapacityExceeded {
                engine: "select",
                fd: 1024,
                limit: 1024
            }
            .kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn resource_error_keeps_source() {
        let e = Error::resource(
            "eventfd creation failed",
            io::Error::from_raw_os_error(libc::EMFILE),
        );

        assert_eq!(e.kind(), ErrorKind::Resource);
        assert_eq!(e.to_string(), "eventfd creation failed");

        let source = std::error::Error::source(&e).expect("resource errors carry a source");
        assert!(source.to_string().contains("Too many open files"));
    }

    #[test]
    fn unsupported_exclusive_names_engine_and_option() {
        let message = Error::UnsupportedExclusive { engine: "select" }.to_string();

        assert!(message.contains("select"));
        assert!(message.contains("exclusive=1"));
    }

    #[test]
    fn io_fault_describes_transfer() {
        let e = Error::IoFault {
            operation: "read",
            expected: 64,
            transferred: 3,
            source: None,
        };

        assert_eq!(e.kind(), ErrorKind::IoFault);
        assert_eq!(e.to_string(), "read failed after 3 of 64 bytes");
    }
}
