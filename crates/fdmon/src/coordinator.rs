// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::mem;

use scopeguard::ScopeGuard;
use tracing::{Level, event};

use crate::{
    Backend, CancellationToken, ChannelPairs, Config, Deadline, Engine, EngineEndpoint, Error,
    Generator, Interrupter, Result, RunReport,
};

/// Engine instances that were created together and are destroyed together.
///
/// Creation is all-or-nothing. Destruction, on drop, happens in reverse creation order.
#[derive(Debug)]
pub struct EngineSet {
    engines: Vec<Box<dyn Engine>>,
}

impl EngineSet {
    /// Creates `count` engines of one backend, each watching every endpoint.
    ///
    /// # Errors
    ///
    /// Returns the first engine creation error. Engines created before the failure have been
    /// destroyed again by the time this returns.
    pub fn create(
        backend: &dyn Backend,
        config: &Config,
        count: usize,
        endpoints: &[EngineEndpoint],
    ) -> Result<Self> {
        let mut engines = scopeguard::guard(Vec::with_capacity(count), destroy_in_reverse);

        for index in 0..count {
            let engine = backend.create(config, endpoints).inspect_err(|e| {
                event!(
                    Level::WARN,
                    message = "engine creation failed, rolling back",
                    engine = backend.name(),
                    index,
                    created = engines.len(),
                    error = %e
                );
            })?;

            engines.push(engine);
        }

        Ok(Self {
            engines: ScopeGuard::into_inner(engines),
        })
    }

    /// The number of engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether the set holds no engines at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// The total number of worker threads across all engines.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.engines.iter().map(|e| e.worker_count()).sum()
    }
}

impl Drop for EngineSet {
    fn drop(&mut self) {
        destroy_in_reverse(mem::take(&mut self.engines));
    }
}

fn destroy_in_reverse(engines: Vec<Box<dyn Engine>>) {
    for engine in engines.into_iter().rev() {
        engine.destroy();
    }
}

/// Performs one benchmark run with the backend selected in `config`.
///
/// See [`run_with_backend()`].
///
/// # Errors
///
/// See [`run_with_backend()`].
pub fn run(config: &Config, token: &CancellationToken) -> Result<RunReport> {
    run_with_backend(config.engine().backend(), config, token)
}

/// Performs one benchmark run with an explicitly supplied backend.
///
/// Creates the channel pairs, then the engines, then runs the workload on the calling thread until
/// the configured duration elapses or `token` is cancelled. Everything is torn down in reverse
/// order of creation before this returns, whether the run succeeded or not.
///
/// The calling thread is the target of the deadline's interruptions, which knock it out of a
/// blocking read or write once the duration has elapsed.
///
/// # Errors
///
/// Returns a configuration or resource error if setup fails; nothing is left running in that
/// case. An I/O fault during the workload is not an error here but is part of the returned
/// [`RunReport`], next to the statistics gathered up to that point.
pub fn run_with_backend(
    backend: &dyn Backend,
    config: &Config,
    token: &CancellationToken,
) -> Result<RunReport> {
    event!(
        Level::INFO,
        message = "starting run",
        engine = backend.name(),
        num_engines = config.num_engines(),
        num_fds = config.num_fds(),
        msg_size = config.msg_size(),
        exclusive = config.exclusive(),
        duration_secs = config.duration().as_secs_f64()
    );

    let pairs = ChannelPairs::new(config.num_fds())?;

    let engines = EngineSet::create(
        backend,
        config,
        config.num_engines(),
        &pairs.engine_endpoints(),
    )?;

    let generator = Generator::new(&pairs, config.msg_size())?;

    let interrupter = Interrupter::current()
        .map_err(|e| Error::resource("failed to install interrupt handler", e))?;

    let deadline = Deadline::arm(config.duration(), token.clone(), interrupter)?;

    let report = generator.run(token);

    deadline.disarm();
    drop(engines);
    drop(pairs);

    event!(
        Level::INFO,
        message = "run finished",
        round_trips = report.stats().round_trips(),
        faulted = report.fault().is_some()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use fdmon_testing::execute_or_abandon;
    use rstest::rstest;

    use super::*;
    use crate::{EngineKind, EpollBackend, MockBackend};

    /// Counts live instances and records the order of destruction.
    #[derive(Debug)]
    struct TrackedEngine {
        id: usize,
        live: Arc<AtomicUsize>,
        destroyed: Arc<Mutex<Vec<usize>>>,
    }

    impl TrackedEngine {
        fn new(id: usize, live: &Arc<AtomicUsize>, destroyed: &Arc<Mutex<Vec<usize>>>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);

            Self {
                id,
                live: Arc::clone(live),
                destroyed: Arc::clone(destroyed),
            }
        }
    }

    impl Engine for TrackedEngine {
        fn name(&self) -> &'static str {
            "tracked"
        }

        fn worker_count(&self) -> usize {
            2
        }
    }

    impl Drop for TrackedEngine {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.destroyed.lock().unwrap().push(self.id);
        }
    }

    fn tracking_backend(
        fail_at: Option<usize>,
        live: &Arc<AtomicUsize>,
        destroyed: &Arc<Mutex<Vec<usize>>>,
    ) -> MockBackend {
        let mut backend = MockBackend::new();
        backend.expect_name().return_const("tracked");

        let calls = AtomicUsize::new(0);
        let live = Arc::clone(live);
        let destroyed = Arc::clone(destroyed);

        backend.expect_create().returning(move |_, _| {
            let id = calls.fetch_add(1, Ordering::SeqCst);

            if Some(id) == fail_at {
                return Err(Error::resource("injected failure", io::Error::other("injected")));
            }

            Ok(Box::new(TrackedEngine::new(id, &live, &destroyed)))
        });

        backend
    }

    fn config(num_engines: usize) -> Config {
        Config::builder()
            .with_engine(EngineKind::Epoll)
            .with_num_engines(num_engines)
            .with_num_fds(2)
            .with_duration(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    fn failed_creation_destroys_earlier_engines(#[case] fail_at: usize) {
        let live = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let backend = tracking_backend(Some(fail_at), &live, &destroyed);

        let e = EngineSet::create(&backend, &config(4), 4, &[]).unwrap_err();

        assert!(matches!(e, Error::Resource { .. }));
        assert_eq!(live.load(Ordering::SeqCst), 0);

        let expected: Vec<_> = (0..fail_at).rev().collect();
        assert_eq!(*destroyed.lock().unwrap(), expected);
    }

    #[test]
    fn destroys_in_reverse_creation_order() {
        let live = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let backend = tracking_backend(None, &live, &destroyed);

        let set = EngineSet::create(&backend, &config(3), 3, &[]).unwrap();

        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
        assert_eq!(set.worker_count(), 6);
        assert_eq!(live.load(Ordering::SeqCst), 3);

        drop(set);

        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(*destroyed.lock().unwrap(), [2, 1, 0]);
    }

    #[test]
    fn run_tears_everything_down_after_setup_failure() {
        let live = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let backend = tracking_backend(Some(2), &live, &destroyed);

        let e = run_with_backend(&backend, &config(4), &CancellationToken::new()).unwrap_err();

        assert_eq!(e.kind(), crate::ErrorKind::Resource);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_creates_every_engine_and_reports() {
        execute_or_abandon(|| {
            let mut backend = MockBackend::new();
            backend.expect_name().return_const("epoll");
            backend
                .expect_create()
                .times(3)
                .returning(|config, endpoints| EpollBackend.create(config, endpoints));

            let stats = run_with_backend(&backend, &config(3), &CancellationToken::new())
                .unwrap()
                .into_result()
                .unwrap();

            assert!(stats.round_trips() > 0);
            assert!(stats.duration() >= Duration::from_millis(200));
        })
        .unwrap();
    }

    #[test]
    fn external_cancellation_ends_run_early() {
        execute_or_abandon(|| {
            let config = Config::builder()
                .with_engine(EngineKind::Poll)
                .with_duration(Duration::from_secs(3600))
                .build()
                .unwrap();

            let token = CancellationToken::new();
            token.cancel();

            let report = run(&config, &token).unwrap();

            assert!(report.fault().is_none());
            assert_eq!(report.stats().round_trips(), 0);
        })
        .unwrap();
    }
}
