// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use crate::engine::{
    Ready, SignaledWorker, ensure_exclusive_supported, message_buffer, retry_wait,
};
use crate::stop_signal::StopSignal;
use crate::sys::cvt;
use crate::{Backend, Config, Engine, EngineEndpoint, EngineKind, Error, Result};

/// Slot of the stop signal in the descriptor array. Endpoints follow it in pair order.
const STOP_SLOT: usize = 0;

/// Per-descriptor result flag backend built on `poll`.
///
/// The descriptor array is built once and handed to the kernel unchanged on every wait; only
/// `POLLIN` results are acted upon.
#[derive(Debug)]
pub struct PollBackend;

impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        EngineKind::Poll.name()
    }

    fn supports_exclusive(&self) -> bool {
        false
    }

    fn create(&self, config: &Config, endpoints: &[EngineEndpoint]) -> Result<Box<dyn Engine>> {
        ensure_exclusive_supported(self, config)?;

        let buffer = message_buffer(config.msg_size())?;

        let stop = Arc::new(
            StopSignal::new().map_err(|e| Error::resource("eventfd creation failed", e))?,
        );

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(endpoints.len() + 1)
            .map_err(|e| {
                Error::resource(
                    "out of memory allocating poll descriptors",
                    std::io::Error::new(std::io::ErrorKind::OutOfMemory, e),
                )
            })?;

        slots.push(interest(stop.as_raw_fd()));
        slots.extend(endpoints.iter().map(|e| interest(e.as_raw_fd())));

        let state = PollWorker {
            slots,
            stop: Arc::clone(&stop),
            endpoints: endpoints.to_vec(),
            buffer,
        };

        let worker = SignaledWorker::start(self.name(), stop, move |ready| state.run(ready))?;

        Ok(Box::new(PollEngine { _worker: worker }))
    }
}

/// A running `poll` engine.
#[derive(Debug)]
pub struct PollEngine {
    _worker: SignaledWorker,
}

impl Engine for PollEngine {
    fn name(&self) -> &'static str {
        EngineKind::Poll.name()
    }

    fn worker_count(&self) -> usize {
        1
    }
}

struct PollWorker {
    slots: Vec<libc::pollfd>,
    stop: Arc<StopSignal>,
    endpoints: Vec<EngineEndpoint>,
    buffer: Box<[u8]>,
}

impl PollWorker {
    fn run(mut self, ready: Ready) {
        ready.signal();

        loop {
            // SAFETY: The array is valid for its full length for the duration of the call.
            let result = cvt(unsafe {
                libc::poll(
                    self.slots.as_mut_ptr(),
                    self.slots.len() as libc::nfds_t,
                    -1,
                )
            });

            match result {
                Ok(_) => {}
                Err(e) if retry_wait(EngineKind::Poll.name(), &e) => continue,
                Err(_) => return,
            }

            if is_readable(&self.slots[STOP_SLOT]) && self.stop.acknowledge() {
                return;
            }

            for (slot, endpoint) in self.slots[STOP_SLOT + 1..].iter().zip(&self.endpoints) {
                if is_readable(slot) {
                    endpoint.echo(&mut self.buffer);
                }
            }
        }
    }
}

const fn interest(fd: libc::c_int) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

const fn is_readable(slot: &libc::pollfd) -> bool {
    slot.revents & libc::POLLIN != 0
}

#[cfg(test)]
mod tests {
    use fdmon_testing::execute_or_abandon;

    use super::*;
    use crate::ChannelPairs;
    use crate::engine::testing::{assert_round_trips, config_for};

    #[test]
    fn only_pollin_counts() {
        let mut slot = interest(3);
        assert!(!is_readable(&slot));

        slot.revents = libc::POLLHUP;
        assert!(!is_readable(&slot));

        slot.revents = libc::POLLIN | libc::POLLHUP;
        assert!(is_readable(&slot));
    }

    #[test]
    fn echoes_on_every_endpoint() {
        execute_or_abandon(|| {
            let pairs = ChannelPairs::new(5).unwrap();
            let config = config_for(EngineKind::Poll, 5, 32, false);
            let engine = PollBackend
                .create(&config, &pairs.engine_endpoints())
                .unwrap();

            assert_eq!(engine.name(), "poll");

            for pair in pairs.iter() {
                assert_round_trips(pair, 32, 2);
            }

            engine.destroy();
        })
        .unwrap();
    }

    #[test]
    fn rejects_exclusive() {
        let pairs = ChannelPairs::new(1).unwrap();
        let config = config_for(EngineKind::Epoll, 1, 1, true);

        let e = PollBackend
            .create(&config, &pairs.engine_endpoints())
            .unwrap_err();

        assert!(matches!(e, Error::UnsupportedExclusive { engine: "poll" }));
    }
}
