use crate::core::time::DateTime;
use crate::core::timeseries::DataPoint;
use crate::power::Uptime;

/// Finds the start of the current run of identical values in a newest-first history.
///
/// History can be fed in pages. Once a value differs from the newest one, the scanner is
/// done and ignores further input; the oldest point of the run marks the last change.
#[derive(Debug)]
pub struct UptimeScanner<V> {
    current: Option<V>,
    since: Option<DateTime>,
    done: bool,
}

impl<V: PartialEq> UptimeScanner<V> {
    pub fn new() -> Self {
        Self {
            current: None,
            since: None,
            done: false,
        }
    }

    /// Returns true once the boundary was found and no more history is needed.
    pub fn feed(&mut self, newest_first: impl IntoIterator<Item = DataPoint<V>>) -> bool {
        if self.done {
            return true;
        }

        for point in newest_first {
            match &self.current {
                None => {
                    self.current = Some(point.value);
                    self.since = Some(point.timestamp);
                }
                Some(current) if *current == point.value => {
                    self.since = Some(point.timestamp);
                }
                Some(_) => {
                    self.done = true;
                    break;
                }
            }
        }

        self.done
    }

    pub fn finish(self, now: DateTime) -> Option<Uptime> {
        self.since.map(|since| Uptime {
            since,
            duration: now.elapsed_since(since),
        })
    }
}

impl<V: PartialEq> Default for UptimeScanner<V> {
    fn default() -> Self {
        Self::new()
    }
}
