// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use io_uring::{IoUring, opcode, types};
use tracing::{Level, event};

use crate::engine::{
    Ready, SignaledWorker, ensure_exclusive_supported, message_buffer, retry_wait,
};
use crate::stop_signal::StopSignal;
use crate::{Backend, Config, Engine, EngineEndpoint, EngineKind, Error, Result};

/// Submission queue entries per ring.
const QUEUE_DEPTH: u32 = 64;

/// Completion token of the stop signal. Endpoints use their index as token.
const STOP_TOKEN: u64 = u64::MAX;

/// Completion-queue backend built on `io_uring` poll submissions.
///
/// Every descriptor gets a one-shot poll request. When it completes, the worker echoes and then
/// submits a fresh request for the same descriptor. With exclusive wakeups, requests carry
/// `EPOLLEXCLUSIVE` in their poll mask.
#[derive(Debug)]
pub struct IoUringBackend;

impl Backend for IoUringBackend {
    fn name(&self) -> &'static str {
        EngineKind::IoUring.name()
    }

    fn supports_exclusive(&self) -> bool {
        true
    }

    fn create(&self, config: &Config, endpoints: &[EngineEndpoint]) -> Result<Box<dyn Engine>> {
        ensure_exclusive_supported(self, config)?;

        let buffer = message_buffer(config.msg_size())?;

        let ring = IoUring::new(QUEUE_DEPTH).map_err(|e| {
            Error::resource(
                "io_uring_queue_init failed (do you need to increase ulimit -l?)",
                e,
            )
        })?;

        let stop = Arc::new(
            StopSignal::new().map_err(|e| Error::resource("eventfd creation failed", e))?,
        );

        let mut state = IoUringWorker {
            ring,
            mask: poll_mask(config.exclusive()),
            stop: Arc::clone(&stop),
            endpoints: endpoints.to_vec(),
            buffer,
        };

        for (token, endpoint) in (0_u64..).zip(endpoints) {
            state
                .arm(endpoint.as_raw_fd(), token)
                .map_err(|e| Error::resource("io_uring_submit failed", e))?;
        }

        state
            .arm(stop.as_raw_fd(), STOP_TOKEN)
            .map_err(|e| Error::resource("io_uring_submit failed", e))?;

        state
            .ring
            .submit()
            .map_err(|e| Error::resource("io_uring_submit failed", e))?;

        let worker = SignaledWorker::start(self.name(), stop, move |ready| state.run(ready))?;

        Ok(Box::new(IoUringEngine { _worker: worker }))
    }
}

/// A running `io_uring` engine.
#[derive(Debug)]
pub struct IoUringEngine {
    _worker: SignaledWorker,
}

impl Engine for IoUringEngine {
    fn name(&self) -> &'static str {
        EngineKind::IoUring.name()
    }

    fn worker_count(&self) -> usize {
        1
    }
}

struct IoUringWorker {
    // Declared first so the ring, and any poll request still pending in it, goes away before the
    // descriptors those requests refer to.
    ring: IoUring,
    mask: u32,
    stop: Arc<StopSignal>,
    endpoints: Vec<EngineEndpoint>,
    buffer: Box<[u8]>,
}

impl IoUringWorker {
    /// Queues a one-shot poll request for `fd`, flushing the submission queue once if it is full.
    fn arm(&mut self, fd: RawFd, token: u64) -> io::Result<()> {
        let entry = opcode::PollAdd::new(types::Fd(fd), self.mask)
            .build()
            .user_data(token);

        // SAFETY: A poll request references no memory, only the descriptor, which outlives the ring.
        if unsafe { self.ring.submission().push(&entry) }.is_ok() {
            return Ok(());
        }

        self.ring.submit()?;

        // SAFETY: As above.
        unsafe { self.ring.submission().push(&entry) }.map_err(io::Error::other)
    }

    fn run(mut self, ready: Ready) {
        let mut completed = Vec::with_capacity(QUEUE_DEPTH as usize);

        ready.signal();

        loop {
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                // The completion queue is full; draining it below makes room.
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {}
                Err(e) if retry_wait(EngineKind::IoUring.name(), &e) => {}
                Err(_) => return,
            }

            completed.clear();
            completed.extend(
                self.ring
                    .completion()
                    .map(|cqe| (cqe.user_data(), cqe.result())),
            );

            for &(token, result) in &completed {
                if self.complete(token, result).is_break() {
                    return;
                }
            }
        }
    }

    /// Handles one completed poll request and re-arms it unless it failed for good.
    ///
    /// Breaks when the worker has to exit: the stop signal was raised or its own poll request
    /// can no longer be submitted.
    fn complete(&mut self, token: u64, result: i32) -> ControlFlow<()> {
        let endpoint = if token == STOP_TOKEN {
            None
        } else {
            let Some(index) = usize::try_from(token)
                .ok()
                .filter(|&index| index < self.endpoints.len())
            else {
                return ControlFlow::Continue(());
            };

            Some(index)
        };

        let fd = endpoint.map_or_else(
            || self.stop.as_raw_fd(),
            |index| self.endpoints[index].as_raw_fd(),
        );

        match poll_outcome(result) {
            Ok(()) => match endpoint {
                Some(index) => {
                    self.endpoints[index].echo(&mut self.buffer);
                }
                None => {
                    if self.stop.acknowledge() {
                        return ControlFlow::Break(());
                    }
                }
            },
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                event!(
                    Level::WARN,
                    message = "poll request failed, descriptor is no longer watched",
                    fd,
                    error = %e
                );

                return if endpoint.is_none() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                };
            }
        }

        if let Err(e) = self.arm(fd, token) {
            event!(Level::WARN, message = "failed to re-arm poll request", fd, error = %e);
        }

        ControlFlow::Continue(())
    }
}

/// Turns the result of a poll completion (revents, or a negated errno) into a `Result`.
fn poll_outcome(result: i32) -> io::Result<()> {
    if result < 0 {
        Err(io::Error::from_raw_os_error(-result))
    } else {
        Ok(())
    }
}

/// Poll request failures that go away by submitting the same request again.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn poll_mask(exclusive: bool) -> u32 {
    let mut mask = u32::from(libc::POLLIN.cast_unsigned());

    if exclusive {
        mask |= libc::EPOLLEXCLUSIVE.cast_unsigned();
    }

    mask
}
