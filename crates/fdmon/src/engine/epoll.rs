// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::engine::{
    Ready, SignaledWorker, ensure_exclusive_supported, message_buffer, retry_wait,
};
use crate::stop_signal::StopSignal;
use crate::sys::{cvt, owned_fd};
use crate::{Backend, Config, Engine, EngineEndpoint, EngineKind, Error, Result};

/// Max number of events to dequeue in one wait. The generator keeps at most one channel pair busy
/// at a time, so one slot for that pair and one for the stop signal are enough.
const EVENTS_PER_WAIT: usize = 2;

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    reason = "small constant"
)]
const EVENTS_PER_WAIT_C: libc::c_int = EVENTS_PER_WAIT as libc::c_int;

/// Event token of the stop signal. Endpoints use their index as token.
const STOP_TOKEN: u64 = u64::MAX;

/// Readiness-list backend built on `epoll`.
///
/// Registrations are level-triggered. With exclusive wakeups, every registration carries
/// `EPOLLEXCLUSIVE`, so when several engine instances watch the same descriptor the kernel wakes
/// only one of them per event instead of all of them.
#[derive(Debug)]
pub struct EpollBackend;

impl Backend for EpollBackend {
    fn name(&self) -> &'static str {
        EngineKind::Epoll.name()
    }

    fn supports_exclusive(&self) -> bool {
        true
    }

    fn create(&self, config: &Config, endpoints: &[EngineEndpoint]) -> Result<Box<dyn Engine>> {
        ensure_exclusive_supported(self, config)?;

        let buffer = message_buffer(config.msg_size())?;

        // SAFETY: No safety requirements; the result is checked by `owned_fd`.
        let epoll = owned_fd(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })
            .map_err(|e| Error::resource("epoll_create1 failed", e))?;

        let interest = interest(config.exclusive());

        for (token, endpoint) in (0_u64..).zip(endpoints) {
            register(&epoll, endpoint.as_raw_fd(), interest, token)
                .map_err(|e| Error::resource("epoll_ctl failed", e))?;
        }

        let stop = Arc::new(
            StopSignal::new().map_err(|e| Error::resource("eventfd creation failed", e))?,
        );

        register(&epoll, stop.as_raw_fd(), interest, STOP_TOKEN)
            .map_err(|e| Error::resource("epoll_ctl failed", e))?;

        let state = EpollWorker {
            epoll,
            stop: Arc::clone(&stop),
            endpoints: endpoints.to_vec(),
            buffer,
        };

        let worker = SignaledWorker::start(self.name(), stop, move |ready| state.run(ready))?;

        Ok(Box::new(EpollEngine { _worker: worker }))
    }
}

/// A running `epoll` engine.
#[derive(Debug)]
pub struct EpollEngine {
    _worker: SignaledWorker,
}

impl Engine for EpollEngine {
    fn name(&self) -> &'static str {
        EngineKind::Epoll.name()
    }

    fn worker_count(&self) -> usize {
        1
    }
}

/// Everything the worker thread owns. Released when the worker exits.
#[derive(Debug)]
struct EpollWorker {
    epoll: OwnedFd,
    stop: Arc<StopSignal>,
    endpoints: Vec<EngineEndpoint>,
    buffer: Box<[u8]>,
}

impl EpollWorker {
    fn run(mut self, ready: Ready) {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENTS_PER_WAIT];

        ready.signal();

        loop {
            // SAFETY: The event buffer is valid for EVENTS_PER_WAIT entries for the duration of the call.
            let count = match cvt(unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    events.as_mut_ptr(),
                    EVENTS_PER_WAIT_C,
                    -1,
                )
            }) {
                Ok(count) => usize::try_from(count).unwrap_or_default(),
                Err(e) if retry_wait(EngineKind::Epoll.name(), &e) => continue,
                Err(_) => return,
            };

            for event in &events[..count] {
                let token = event.u64;

                if token == STOP_TOKEN {
                    if self.stop.acknowledge() {
                        return;
                    }

                    continue;
                }

                if let Some(endpoint) = usize::try_from(token)
                    .ok()
                    .and_then(|index| self.endpoints.get(index))
                {
                    endpoint.echo(&mut self.buffer);
                }
            }
        }
    }
}

fn interest(exclusive: bool) -> u32 {
    let mut events = libc::EPOLLIN.cast_unsigned();

    if exclusive {
        events |= libc::EPOLLEXCLUSIVE.cast_unsigned();
    }

    events
}

fn register(epoll: &OwnedFd, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
    let mut event = libc::epoll_event { events, u64: token };

    // SAFETY: The event is initialized and lives for the duration of the call.
    cvt(unsafe { libc::epoll_ctl(epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &raw mut event) })?;
    Ok(())
}
