// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use tracing::{Level, event};

use crate::engine::message_buffer;
use crate::sys::{process_cpu_time, thread_id};
use crate::{CancellationToken, ChannelPairs, Error, Result, Stats};

/// Drives synchronous request/response traffic through the generator endpoints.
///
/// Single-threaded: every round trip writes one message to one endpoint, blocks until the echo
/// has been read back and only then moves on to the next endpoint, drawn at random. At most one
/// channel pair is busy at any time.
#[derive(Debug)]
pub struct Generator<'a> {
    endpoints: Vec<&'a UnixStream>,
    message: Box<[u8]>,
    rng: fastrand::Rng,
}

impl<'a> Generator<'a> {
    /// Prepares a generator for the given pairs and message size.
    ///
    /// The endpoint sequence is seeded from the calling thread's kernel identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if there are no pairs or the message size is zero and
    /// [`Error::Resource`] if the message buffer cannot be allocated.
    pub fn new(pairs: &'a ChannelPairs, msg_size: usize) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Error::InvalidOption { option: "num-fds" });
        }

        if msg_size == 0 {
            return Err(Error::InvalidOption { option: "msg-size" });
        }

        Ok(Self {
            endpoints: pairs.generator_endpoints(),
            message: message_buffer(msg_size)?,
            rng: fastrand::Rng::with_seed(u64::from(thread_id().cast_unsigned())),
        })
    }

    /// Runs round trips until `token` is cancelled or a transfer comes up short.
    ///
    /// The token is checked before every round trip and after every blocking call, so a blocking
    /// call that fails because cancellation interrupted it ends the run normally. Any other
    /// transfer that moves a different number of bytes than one full message ends the run early
    /// with [`Error::IoFault`] in the report.
    pub fn run(mut self, token: &CancellationToken) -> RunReport {
        let start_cpu = cpu_time_now();
        let start = Instant::now();

        let mut round_trips: u64 = 0;
        let mut index = 0;

        let fault = loop {
            if token.is_cancelled() {
                break None;
            }

            let mut endpoint = self.endpoints[index];

            let written = endpoint.write(&self.message);
            if token.is_cancelled() {
                break None;
            }
            if let Err(e) = check_transfer("write", self.message.len(), written) {
                break Some(e);
            }

            let read = endpoint.read(&mut self.message);
            if token.is_cancelled() {
                break None;
            }
            if let Err(e) = check_transfer("read", self.message.len(), read) {
                break Some(e);
            }

            round_trips += 1;
            index = self.rng.usize(..self.endpoints.len());
        };

        let duration = start.elapsed();
        let cpu_time = cpu_time_now().saturating_sub(start_cpu);

        if let Some(e) = &fault {
            event!(Level::ERROR, message = "workload ended early", error = %e);
        }

        event!(
            Level::INFO,
            message = "workload finished",
            round_trips,
            duration_secs = duration.as_secs_f64()
        );

        RunReport::new(Stats::new(duration, round_trips, cpu_time), fault)
    }
}

/// The outcome of a workload run: statistics, plus the fault that ended it early, if any.
#[derive(Debug)]
pub struct RunReport {
    stats: Stats,
    fault: Option<Error>,
}

impl RunReport {
    /// Combines statistics with the fault that ended the run early, if any.
    #[must_use]
    pub const fn new(stats: Stats, fault: Option<Error>) -> Self {
        Self { stats, fault }
    }

    /// Statistics gathered up to the end of the run, including runs that ended with a fault.
    #[must_use]
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The I/O fault that ended the run early, if any.
    #[must_use]
    pub const fn fault(&self) -> Option<&Error> {
        self.fault.as_ref()
    }

    /// Splits the report, turning a fault into an error.
    ///
    /// # Errors
    ///
    /// Returns the fault that ended the run early, if any.
    pub fn into_result(self) -> Result<Stats> {
        match self.fault {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

fn check_transfer(
    operation: &'static str,
    expected: usize,
    result: io::Result<usize>,
) -> Result<()> {
    match result {
        Ok(transferred) if transferred == expected => Ok(()),
        Ok(transferred) => Err(Error::IoFault {
            operation,
            expected,
            transferred,
            source: None,
        }),
        Err(e) => Err(Error::IoFault {
            operation,
            expected,
            transferred: 0,
            source: Some(e),
        }),
    }
}

#[cfg_attr(test, mutants::skip)] // getrusage(RUSAGE_SELF) does not fail in tests.
fn cpu_time_now() -> Duration {
    process_cpu_time().unwrap_or_else(|e| {
        event!(Level::WARN, message = "failed to read process CPU time", error = %e);
        Duration::ZERO
    })
}
