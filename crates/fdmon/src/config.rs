// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::{EngineKind, Error, Result};

/// Validated, immutable parameters of one benchmark run.
///
/// Build one with [`Config::builder()`]. A `Config` that exists has passed validation: every count
/// is positive and exclusive wakeups are only requested from backends that support them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    engine: EngineKind,
    num_engines: usize,
    num_fds: usize,
    msg_size: usize,
    exclusive: bool,
    duration: Duration,
}

impl Config {
    /// Starts building a configuration from the defaults: the `select` engine, one engine
    /// instance, one descriptor pair, one-byte messages, no exclusive wakeups and 30 seconds.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The selected backend.
    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        self.engine
    }

    /// How many engine instances watch the descriptor set.
    #[must_use]
    pub const fn num_engines(&self) -> usize {
        self.num_engines
    }

    /// How many channel pairs to create.
    #[must_use]
    pub const fn num_fds(&self) -> usize {
        self.num_fds
    }

    /// Bytes per message.
    #[must_use]
    pub const fn msg_size(&self) -> usize {
        self.msg_size
    }

    /// Whether engines request exclusive wakeups.
    #[must_use]
    pub const fn exclusive(&self) -> bool {
        self.exclusive
    }

    /// How long the workload runs.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

/// Collects benchmark parameters and validates them into a [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    engine: EngineKind,
    num_engines: usize,
    num_fds: usize,
    msg_size: usize,
    exclusive: bool,
    duration: Duration,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            num_engines: 1,
            num_fds: 1,
            msg_size: 1,
            exclusive: false,
            duration: Duration::from_secs(30),
        }
    }
}

impl ConfigBuilder {
    /// Selects the backend.
    #[must_use]
    pub const fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Sets how many engine instances watch the descriptor set.
    #[must_use]
    pub const fn with_num_engines(mut self, num_engines: usize) -> Self {
        self.num_engines = num_engines;
        self
    }

    /// Sets how many channel pairs to create.
    #[must_use]
    pub const fn with_num_fds(mut self, num_fds: usize) -> Self {
        self.num_fds = num_fds;
        self
    }

    /// Sets the number of bytes per message.
    #[must_use]
    pub const fn with_msg_size(mut self, msg_size: usize) -> Self {
        self.msg_size = msg_size;
        self
    }

    /// Requests exclusive wakeups.
    #[must_use]
    pub const fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Sets how long the workload runs.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for a zero count, size or duration and
    /// [`Error::UnsupportedExclusive`] if exclusive wakeups were requested from a backend that
    /// cannot provide them.
    pub fn build(self) -> Result<Config> {
        for (option, value) in [
            ("num-engines", self.num_engines),
            ("num-fds", self.num_fds),
            ("msg-size", self.msg_size),
        ] {
            if value == 0 {
                return Err(Error::InvalidOption { option });
            }
        }

        if self.duration.is_zero() {
            return Err(Error::InvalidOption {
                option: "duration-secs",
            });
        }

        if self.exclusive && !self.engine.supports_exclusive() {
            return Err(Error::UnsupportedExclusive {
                engine: self.engine.name(),
            });
        }

        Ok(Config {
            engine: self.engine,
            num_engines: self.num_engines,
            num_fds: self.num_fds,
            msg_size: self.msg_size,
            exclusive: self.exclusive,
            duration: self.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::builder().build().unwrap();

        assert_eq!(config.engine(), EngineKind::Select);
        assert_eq!(config.num_engines(), 1);
        assert_eq!(config.num_fds(), 1);
        assert_eq!(config.msg_size(), 1);
        assert!(!config.exclusive());
        assert_eq!(config.duration(), Duration::from_secs(30));
    }

    #[test]
    fn keeps_values() {
        let config = Config::builder()
            .with_engine(EngineKind::Epoll)
            .with_num_engines(4)
            .with_num_fds(8)
            .with_msg_size(4096)
            .with_exclusive(true)
            .with_duration(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(config.engine(), EngineKind::Epoll);
        assert_eq!(config.num_engines(), 4);
        assert_eq!(config.num_fds(), 8);
        assert_eq!(config.msg_size(), 4096);
        assert!(config.exclusive());
        assert_eq!(config.duration(), Duration::from_secs(2));
    }

    #[rstest]
    #[case::num_engines(Config::builder().with_num_engines(0), "num-engines")]
    #[case::num_fds(Config::builder().with_num_fds(0), "num-fds")]
    #[case::msg_size(Config::builder().with_msg_size(0), "msg-size")]
    #[case::duration(Config::builder().with_duration(Duration::ZERO), "duration-secs")]
    fn rejects_zero(#[case] builder: ConfigBuilder, #[case] expected: &str) {
        match builder.build() {
            Err(Error::InvalidOption { option }) => assert_eq!(option, expected),
            other => panic!("expected InvalidOption, got {other:?}"),
        }
    }

    #[rstest]
    #[case(EngineKind::Select)]
    #[case(EngineKind::Poll)]
    #[case(EngineKind::Threads)]
    fn rejects_exclusive_without_support(#[case] engine: EngineKind) {
        let e = Config::builder()
            .with_engine(engine)
            .with_exclusive(true)
            .build()
            .unwrap_err();

        assert!(matches!(e, Error::UnsupportedExclusive { engine: name } if name == engine.name()));
    }

    #[rstest]
    #[case(EngineKind::Epoll)]
    #[case(EngineKind::IoUring)]
    fn accepts_exclusive_with_support(#[case] engine: EngineKind) {
        let config = Config::builder()
            .with_engine(engine)
            .with_exclusive(true)
            .build()
            .unwrap();

        assert!(config.exclusive());
    }
}
