// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Display};
use std::io::{self, Write};
use std::time::Duration;

/// The summary of one workload run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stats {
    duration: Duration,
    round_trips: u64,
    cpu_time: Duration,
}

impl Stats {
    /// The header line preceding the data row in [`Stats::write_csv()`].
    pub const CSV_HEADER: &'static str =
        "Duration (s),Total Roundtrips,Roundtrips/sec,CPU usage (s),Roundtrips/cpusec";

    /// Creates statistics from wall-clock time, completed round trips and process CPU time.
    #[must_use]
    pub const fn new(duration: Duration, round_trips: u64, cpu_time: Duration) -> Self {
        Self {
            duration,
            round_trips,
            cpu_time,
        }
    }

    /// Wall-clock time the workload ran for.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Completed round trips.
    #[must_use]
    pub const fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// User plus system CPU time the whole process consumed while the workload ran.
    #[must_use]
    pub const fn cpu_time(&self) -> Duration {
        self.cpu_time
    }

    /// Round trips per wall-clock second, or zero if no time elapsed.
    #[must_use]
    pub fn round_trips_per_sec(&self) -> f64 {
        rate(self.round_trips, self.duration)
    }

    /// Round trips per CPU second, or zero if no CPU time was consumed.
    #[must_use]
    pub fn round_trips_per_cpu_sec(&self) -> f64 {
        rate(self.round_trips, self.cpu_time)
    }

    /// Writes [`Stats::CSV_HEADER`] and the data row, each terminated by a newline.
    ///
    /// # Errors
    ///
    /// Returns any error of the underlying writer.
    pub fn write_csv(&self, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "{}", Self::CSV_HEADER)?;
        writeln!(out, "{self}")?;
        out.flush()
    }
}

/// Formats the CSV data row, without a trailing newline.
impl Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.duration.as_secs_f64(),
            self.round_trips,
            self.round_trips_per_sec(),
            self.cpu_time.as_secs_f64(),
            self.round_trips_per_cpu_sec()
        )
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "rates are reported with f64 precision"
)]
fn rate(count: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        0.0
    } else {
        count as f64 / elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates() {
        let stats = Stats::new(Duration::from_secs(2), 100, Duration::from_millis(500));

        assert!((stats.round_trips_per_sec() - 50.0).abs() < f64::EPSILON);
        assert!((stats.round_trips_per_cpu_sec() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_time_yields_zero_rate() {
        let stats = Stats::new(Duration::ZERO, 10, Duration::ZERO);

        assert!(stats.round_trips_per_sec().abs() < f64::EPSILON);
        assert!(stats.round_trips_per_cpu_sec().abs() < f64::EPSILON);
    }

    #[test]
    fn csv_has_header_and_one_row() {
        let stats = Stats::new(Duration::from_millis(1500), 3, Duration::from_millis(250));

        let mut out = Vec::new();
        stats.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, [Stats::CSV_HEADER, "1.5,3,2,0.25,12"]);
    }

    #[test]
    fn header_and_row_have_same_arity() {
        let stats = Stats::new(Duration::from_secs(1), 1, Duration::from_secs(1));

        assert_eq!(
            Stats::CSV_HEADER.split(',').count(),
            stats.to_string().split(',').count()
        );
    }
}
