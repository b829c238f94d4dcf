// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::{AsRawFd, RawFd};
use std::ptr;
use std::sync::Arc;

use crate::engine::{
    Ready, SignaledWorker, ensure_exclusive_supported, message_buffer, retry_wait,
};
use crate::stop_signal::StopSignal;
use crate::sys::cvt;
use crate::{Backend, Config, Engine, EngineEndpoint, EngineKind, Error, Result};

/// Exclusive upper bound on descriptor numbers a `select` descriptor set can hold (`FD_SETSIZE`).
pub const SELECT_CAPACITY: usize = 8 * size_of::<libc::fd_set>();

/// Descriptor set backend built on `select`.
///
/// The kernel overwrites the set on every wait, so the worker rebuilds it from scratch each time.
/// Descriptors numbered [`SELECT_CAPACITY`] or higher cannot be represented and are rejected
/// when the engine is created, before anything else is acquired.
#[derive(Debug)]
pub struct SelectBackend;

impl Backend for SelectBackend {
    fn name(&self) -> &'static str {
        EngineKind::Select.name()
    }

    fn supports_exclusive(&self) -> bool {
        false
    }

    fn create(&self, config: &Config, endpoints: &[EngineEndpoint]) -> Result<Box<dyn Engine>> {
        ensure_exclusive_supported(self, config)?;

        for endpoint in endpoints {
            ensure_selectable(endpoint.as_raw_fd())?;
        }

        let buffer = message_buffer(config.msg_size())?;

        let stop = Arc::new(
            StopSignal::new().map_err(|e| Error::resource("eventfd creation failed", e))?,
        );

        // The stop signal can itself land beyond the limit when the process is close to it.
        ensure_selectable(stop.as_raw_fd())?;

        let highest = endpoints
            .iter()
            .map(AsRawFd::as_raw_fd)
            .chain([stop.as_raw_fd()])
            .max()
            .unwrap_or_default();

        let state = SelectWorker {
            nfds: highest + 1,
            stop: Arc::clone(&stop),
            endpoints: endpoints.to_vec(),
            buffer,
        };

        let worker = SignaledWorker::start(self.name(), stop, move |ready| state.run(ready))?;

        Ok(Box::new(SelectEngine { _worker: worker }))
    }
}

/// A running `select` engine.
#[derive(Debug)]
pub struct SelectEngine {
    _worker: SignaledWorker,
}

impl Engine for SelectEngine {
    fn name(&self) -> &'static str {
        EngineKind::Select.name()
    }

    fn worker_count(&self) -> usize {
        1
    }
}

#[derive(Debug)]
struct SelectWorker {
    nfds: libc::c_int,
    stop: Arc<StopSignal>,
    endpoints: Vec<EngineEndpoint>,
    buffer: Box<[u8]>,
}

impl SelectWorker {
    fn run(mut self, ready: Ready) {
        ready.signal();

        loop {
            let mut readable = DescriptorSet::new();

            readable.insert(self.stop.as_raw_fd());
            for endpoint in &self.endpoints {
                readable.insert(endpoint.as_raw_fd());
            }

            // SAFETY: The set is valid for the duration of the call and every descriptor in it is
            // below `nfds`, which in turn is within the set's capacity.
            let result = cvt(unsafe {
                libc::select(
                    self.nfds,
                    readable.as_mut_ptr(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            });

            match result {
                Ok(_) => {}
                Err(e) if retry_wait(EngineKind::Select.name(), &e) => continue,
                Err(_) => return,
            }

            if readable.contains(self.stop.as_raw_fd()) && self.stop.acknowledge() {
                return;
            }

            for endpoint in &self.endpoints {
                if readable.contains(endpoint.as_raw_fd()) {
                    endpoint.echo(&mut self.buffer);
                }
            }
        }
    }
}

/// Rejects descriptors that cannot be stored in a `select` descriptor set.
fn ensure_selectable(fd: RawFd) -> Result<()> {
    match usize::try_from(fd) {
        Ok(index) if index < SELECT_CAPACITY => Ok(()),
        _ => Err(Error::CapacityExceeded {
            engine: EngineKind::Select.name(),
            fd,
            limit: SELECT_CAPACITY,
        }),
    }
}

/// A `fd_set` that only ever holds descriptors accepted by [`ensure_selectable()`].
struct DescriptorSet(libc::fd_set);

impl DescriptorSet {
    fn new() -> Self {
        // SAFETY: An all-zero `fd_set` is the empty set.
        Self(unsafe { std::mem::zeroed() })
    }

    fn insert(&mut self, fd: RawFd) {
        debug_assert!(ensure_selectable(fd).is_ok());

        // SAFETY: The descriptor is within the set's capacity.
        unsafe { libc::FD_SET(fd, &raw mut self.0) };
    }

    fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: The descriptor is within the set's capacity.
        unsafe { libc::FD_ISSET(fd, &raw const self.0) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &raw mut self.0
    }
}

#[cfg(test)]
mod tests {
    use fdmon_testing::execute_or_abandon;

    use super::*;
    use crate::ChannelPairs;
    use crate::engine::spawn_ready;
    use crate::engine::testing::{assert_round_trips, config_for};

    #[test]
    fn capacity_is_fd_setsize() {
        assert_eq!(SELECT_CAPACITY, 1024);
    }

    #[test]
    fn accepts_descriptors_below_capacity() {
        ensure_selectable(0).unwrap();
        ensure_selectable(1023).unwrap();
    }

    #[test]
    fn rejects_descriptors_at_or_above_capacity() {
        for fd in [1024, 4096, -1] {
            let e = ensure_selectable(fd).unwrap_err();

            assert!(matches!(
                e,
                Error::CapacityExceeded {
                    engine: "select",
                    fd: rejected,
                    limit: 1024,
                } if rejected == fd
            ));
        }
    }

    #[test]
    fn descriptor_set_tracks_membership() {
        let mut set = DescriptorSet::new();
        assert!(!set.contains(5));

        set.insert(5);
        set.insert(1023);

        assert!(set.contains(5));
        assert!(set.contains(1023));
        assert!(!set.contains(6));
    }

    #[test]
    fn worker_exits_when_wait_fails() {
        execute_or_abandon(|| {
            // A negative descriptor count makes every select() fail with EINVAL.
            let state = SelectWorker {
                nfds: -1,
                stop: Arc::new(StopSignal::new().unwrap()),
                endpoints: Vec::new(),
                buffer: message_buffer(1).unwrap(),
            };

            let thread = spawn_ready("select", move |ready| state.run(ready)).unwrap();
            thread.join().unwrap();
        })
        .unwrap();
    }

    #[test]
    fn echoes_on_every_endpoint() {
        execute_or_abandon(|| {
            let pairs = ChannelPairs::new(3).unwrap();
            let config = config_for(EngineKind::Select, 3, 64, false);
            let engine = SelectBackend
                .create(&config, &pairs.engine_endpoints())
                .unwrap();

            assert_eq!(engine.name(), "select");

            for pair in pairs.iter() {
                assert_round_trips(pair, 64, 3);
            }

            engine.destroy();
        })
        .unwrap();
    }
}
