// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use tracing::{Level, event};

use crate::sys::set_nonblocking;
use crate::{Error, Result};

/// A bidirectional byte pipe between the workload generator and the engines.
///
/// Backed by a Unix stream socket pair. The generator endpoint is blocking and owned by the
/// generator alone. The engine endpoint is non-blocking and shared by every engine instance,
/// which all watch the same set of descriptors.
#[derive(Debug)]
pub struct ChannelPair {
    generator: UnixStream,
    engine: EngineEndpoint,
}

impl ChannelPair {
    /// Creates a connected pair with the engine endpoint in non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the socket pair cannot be created or configured.
    pub fn new() -> Result<Self> {
        let (engine, generator) =
            UnixStream::pair().map_err(|e| Error::resource("socketpair failed", e))?;

        engine
            .set_nonblocking(true)
            .map_err(|e| Error::resource("failed to make engine endpoint non-blocking", e))?;

        Ok(Self {
            generator,
            engine: EngineEndpoint {
                stream: Arc::new(engine),
            },
        })
    }

    /// The blocking endpoint the generator writes requests to and reads echoes from.
    #[must_use]
    pub const fn generator(&self) -> &UnixStream {
        &self.generator
    }

    /// The non-blocking endpoint engines watch and echo on.
    #[must_use]
    pub const fn engine(&self) -> &EngineEndpoint {
        &self.engine
    }
}

/// The engine-facing end of a [`ChannelPair`].
///
/// Cloning shares the same descriptor. Engines keep their clones until their workers have been
/// joined, so the descriptor is closed only after the pair and every engine watching it are gone.
#[derive(Clone, Debug)]
pub struct EngineEndpoint {
    stream: Arc<UnixStream>,
}

impl EngineEndpoint {
    /// Performs one echo step: reads up to `buf.len()` bytes and writes back exactly what was read.
    ///
    /// Returns `false` if there was nothing to echo - the peer is gone, another engine instance
    /// won the race for the data or the read failed for any other reason. Such misses are not
    /// errors; the next readiness notification retries.
    ///
    /// A short read produces a short echo. The stream is not resynchronized to message boundaries.
    pub(crate) fn echo(&self, buf: &mut [u8]) -> bool {
        let read = match (&*self.stream).read(buf) {
            Ok(0) | Err(_) => return false,
            Ok(read) => read,
        };

        // The peer is a blocking socket that always drains the echo before writing again, so
        // a failed or short write here has no recovery either way.
        _ = (&*self.stream).write(&buf[..read]);
        true
    }

    pub(crate) fn set_blocking(&self) -> std::io::Result<()> {
        set_nonblocking(self.as_raw_fd(), false)
    }
}

impl AsRawFd for EngineEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// The full set of channel pairs for one benchmark run.
#[derive(Debug)]
pub struct ChannelPairs {
    pairs: Vec<ChannelPair>,
}

impl ChannelPairs {
    /// Creates `count` channel pairs. On failure, the pairs created so far are closed again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if any pair cannot be created.
    pub fn new(count: usize) -> Result<Self> {
        let pairs = (0..count)
            .map(|_| ChannelPair::new())
            .collect::<Result<Vec<_>>>()?;

        event!(Level::DEBUG, message = "channel pairs created", count);

        Ok(Self { pairs })
    }

    /// The number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no pairs at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Shared handles to every engine endpoint, in pair order.
    #[must_use]
    pub fn engine_endpoints(&self) -> Vec<EngineEndpoint> {
        self.pairs.iter().map(|p| p.engine.clone()).collect()
    }

    /// Every generator endpoint, in pair order.
    #[must_use]
    pub fn generator_endpoints(&self) -> Vec<&UnixStream> {
        self.pairs.iter().map(ChannelPair::generator).collect()
    }

    /// Iterates over the pairs.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelPair> {
        self.pairs.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_types() {
        assert_impl_all!(EngineEndpoint: Send, Sync, Clone);
        assert_impl_all!(ChannelPairs: Send, Sync);
    }

    #[test]
    fn engine_endpoint_is_nonblocking() {
        let pair = ChannelPair::new().unwrap();
        let mut buf = [0_u8; 4];

        let e = (&*pair.engine().stream).read(&mut buf).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn echo_returns_bytes_read() {
        let pair = ChannelPair::new().unwrap();
        pair.generator().write_all(b"hello").unwrap();

        let mut buf = [0_u8; 16];
        assert!(pair.engine().echo(&mut buf));

        let mut echoed = [0_u8; 5];
        pair.generator().read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"hello");
    }

    #[test]
    fn echo_truncates_to_buffer() {
        let pair = ChannelPair::new().unwrap();
        pair.generator().write_all(b"abcdef").unwrap();

        let mut buf = [0_u8; 4];
        assert!(pair.engine().echo(&mut buf));
        assert!(pair.engine().echo(&mut buf));

        let mut echoed = [0_u8; 6];
        pair.generator().read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"abcdef");
    }

    #[test]
    fn echo_skips_when_nothing_to_read() {
        let pair = ChannelPair::new().unwrap();
        let mut buf = [0_u8; 4];

        assert!(!pair.engine().echo(&mut buf));
    }

    #[test]
    fn echo_skips_closed_peer() {
        let ChannelPair { generator, engine } = ChannelPair::new().unwrap();
        drop(generator);

        let mut buf = [0_u8; 4];
        assert!(!engine.echo(&mut buf));
    }

    #[test]
    fn creates_requested_number_of_pairs() {
        let pairs = ChannelPairs::new(3).unwrap();

        assert_eq!(pairs.len(), 3);
        assert!(!pairs.is_empty());
        assert_eq!(pairs.engine_endpoints().len(), 3);
        assert_eq!(pairs.generator_endpoints().len(), 3);
        assert_eq!(pairs.iter().count(), 3);
    }
}
