// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{Level, event};

use crate::{CancellationToken, Error, Interrupter, Result};

/// How often an expired deadline repeats the interruption until it is disarmed.
const REINTERRUPT_INTERVAL: Duration = Duration::from_millis(10);

/// Bounds the duration of a run.
///
/// When the duration elapses, a timer thread cancels the token and interrupts the target thread
/// so that a blocking call in progress there returns instead of waiting for data that may never
/// come. The interruption is repeated until the deadline is disarmed, because a single one may
/// land just before the target enters its next blocking call and be lost.
///
/// Dropping the deadline disarms it and joins the timer thread. After that, the target thread
/// receives no further interruptions.
#[derive(Debug)]
pub struct Deadline {
    disarm: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Starts the timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the timer thread cannot be started.
    pub fn arm(
        duration: Duration,
        token: CancellationToken,
        interrupter: Interrupter,
    ) -> Result<Self> {
        let (disarm_tx, disarm_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("deadline".to_string())
            .spawn(move || {
                if disarm_rx.recv_timeout(duration) != Err(RecvTimeoutError::Timeout) {
                    return;
                }

                event!(Level::DEBUG, message = "deadline expired", duration_secs = duration.as_secs_f64());

                token.cancel();

                loop {
                    interrupter.interrupt();

                    if disarm_rx.recv_timeout(REINTERRUPT_INTERVAL) != Err(RecvTimeoutError::Timeout) {
                        return;
                    }
                }
            })
            .map_err(|e| Error::resource("failed to start deadline timer", e))?;

        Ok(Self {
            disarm: Some(disarm_tx),
            thread: Some(thread),
        })
    }

    /// Stops the timer. Equivalent to dropping the deadline.
    pub fn disarm(self) {
        drop(self);
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        // Closing the channel wakes the timer thread.
        drop(self.disarm.take());

        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            event!(Level::WARN, message = "deadline timer panicked");
        }
    }
}
