// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{Level, event};

use crate::engine::{Ready, ensure_exclusive_supported, join_worker, message_buffer, spawn_ready};
use crate::{Backend, Config, Engine, EngineEndpoint, EngineKind, Error, Interrupter, Result};

/// How long to wait for a worker to exit before interrupting the remaining ones again.
const INTERRUPT_INTERVAL: Duration = Duration::from_millis(5);

/// Thread-per-descriptor backend without any readiness mechanism.
///
/// Every endpoint is switched to blocking mode and gets a dedicated worker thread that loops on a
/// blocking read followed by the echo. Workers cannot wait on a stop signal next to their
/// descriptor, so destroying the engine raises a shared flag and then interrupts the workers'
/// blocking calls. This takes the place of forcibly cancelling the threads, which Rust frames do
/// not survive.
///
/// Destruction blocks on the workers' exit notifications. Only workers still running when no
/// notification arrives within a few milliseconds are interrupted again: an interruption that lands
/// between a worker's flag check and its next blocking call is lost.
#[derive(Debug)]
pub struct ThreadsBackend;

impl Backend for ThreadsBackend {
    fn name(&self) -> &'static str {
        EngineKind::Threads.name()
    }

    fn supports_exclusive(&self) -> bool {
        false
    }

    fn create(&self, config: &Config, endpoints: &[EngineEndpoint]) -> Result<Box<dyn Engine>> {
        ensure_exclusive_supported(self, config)?;

        // Attaching interrupters to workers below cannot fail once the handler is installed.
        Interrupter::install()
            .map_err(|e| Error::resource("failed to install interrupt handler", e))?;

        for endpoint in endpoints {
            endpoint
                .set_blocking()
                .map_err(|e| Error::resource("failed to make endpoint blocking", e))?;
        }

        // Workers that start successfully are owned by the engine right away, so an error part way
        // through stops and joins them when the engine is dropped on the way out.
        let (exited_tx, exited_rx) = mpsc::channel();

        let mut engine = ThreadsEngine {
            stop: Arc::new(AtomicBool::new(false)),
            exited: exited_rx,
            workers: Vec::with_capacity(endpoints.len()),
        };

        for endpoint in endpoints {
            let buffer = message_buffer(config.msg_size())?;

            let thread = spawn_ready(self.name(), {
                let endpoint = endpoint.clone();
                let stop = Arc::clone(&engine.stop);
                let exited = exited_tx.clone();
                move |ready| {
                    // Sent on every way out of the worker, panics included.
                    let _exited = scopeguard::guard(exited, |exited| _ = exited.send(()));
                    serve(&endpoint, &stop, buffer, ready);
                }
            })?;

            let interrupter = Interrupter::for_thread(&thread)
                .map_err(|e| Error::resource("failed to install interrupt handler", e))?;

            engine.workers.push(FdWorker {
                thread,
                interrupter,
            });
        }

        event!(
            Level::DEBUG,
            message = "engine started",
            engine = self.name(),
            workers = engine.workers.len()
        );

        Ok(Box::new(engine))
    }
}

/// A running thread-per-descriptor engine.
#[derive(Debug)]
pub struct ThreadsEngine {
    stop: Arc<AtomicBool>,
    exited: mpsc::Receiver<()>,
    workers: Vec<FdWorker>,
}

#[derive(Debug)]
struct FdWorker {
    thread: JoinHandle<()>,
    interrupter: Interrupter,
}

impl Engine for ThreadsEngine {
    fn name(&self) -> &'static str {
        EngineKind::Threads.name()
    }

    fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadsEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        let mut running = mem::take(&mut self.workers);

        while !running.is_empty() {
            for worker in &running {
                worker.interrupter.interrupt();
            }

            // Either a worker has exited or the interruptions are repeated.
            _ = self.exited.recv_timeout(INTERRUPT_INTERVAL);

            let (finished, still_running): (Vec<_>, Vec<_>) = running
                .into_iter()
                .partition(|worker| worker.thread.is_finished());

            for worker in finished {
                join_worker(EngineKind::Threads.name(), worker.thread);
            }

            running = still_running;
        }

        event!(Level::DEBUG, message = "engine stopped", engine = self.name());
    }
}

fn serve(endpoint: &EngineEndpoint, stop: &AtomicBool, mut buffer: Box<[u8]>, ready: Ready) {
    ready.signal();

    while !stop.load(Ordering::Acquire) {
        endpoint.echo(&mut buffer);
    }
}
