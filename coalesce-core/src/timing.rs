//! Timing policies deciding when a pending batch fires.
//!
//! A policy maps the current batch's `start` (first query) and `latest`
//! (most recent query) to the delay from *now* until the batch should run.
//! The loader re-arms its single timer with that delay on every query.
//!
//! | Policy   | Delay returned                         | Batch fires at                    |
//! |----------|----------------------------------------|-----------------------------------|
//! | `Window` | `d - (latest - start)`                 | `start + d`                       |
//! | `Buffer` | `d`                                    | `latest + d`                      |
//! | `Capped` | `min(buffer, max_wait - (latest - start))` | `min(latest + buffer, start + max_wait)` |
//!
//! Any `Fn(Instant, Instant) -> Duration` closure is a policy too.

use std::time::Duration;

use tokio::time::Instant;

/// Decides the remaining wait before the current batch executes
pub trait TimingPolicy: Send + Sync {
    fn delay(&self, start: Instant, latest: Instant) -> Duration;
}

impl<F> TimingPolicy for F
where
    F: Fn(Instant, Instant) -> Duration + Send + Sync,
{
    fn delay(&self, start: Instant, latest: Instant) -> Duration {
        self(start, latest)
    }
}

/// Fixed window: fire a fixed time after the first query of the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(pub Duration);

impl Window {
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }
}

impl TimingPolicy for Window {
    fn delay(&self, start: Instant, latest: Instant) -> Duration {
        self.0.saturating_sub(latest.saturating_duration_since(start))
    }
}

/// Sliding buffer: fire a fixed time after the most recent query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer(pub Duration);

impl Buffer {
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }
}

impl TimingPolicy for Buffer {
    fn delay(&self, _start: Instant, _latest: Instant) -> Duration {
        self.0
    }
}

/// Sliding buffer bounded by a maximum wait measured from the first query.
///
/// Keeps a steady stream of queries from deferring a batch forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capped {
    pub buffer: Duration,
    pub max_wait: Duration,
}

impl Capped {
    pub fn new(buffer: Duration, max_wait: Duration) -> Self {
        Self { buffer, max_wait }
    }
}

impl TimingPolicy for Capped {
    fn delay(&self, start: Instant, latest: Instant) -> Duration {
        let remaining = self.max_wait.saturating_sub(latest.saturating_duration_since(start));
        self.buffer.min(remaining)
    }
}

/// A batch predicted by [`plan_batches`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBatch {
    /// Index of the first arrival in the batch
    pub first: usize,
    /// Number of arrivals that joined the batch
    pub len: usize,
    /// Fire time, as an offset from time zero
    pub fires_at: Duration,
}

/// Predict how a policy groups arrivals, without running a loader.
///
/// `arrivals` are offsets from time zero and are taken in sorted order. An
/// arrival landing exactly on a batch's fire time starts the next batch, the
/// same way the loader's timer wins a tie against a late query.
///
/// A delay too large for the clock means the batch never fires: it absorbs
/// every later arrival and reports `fires_at` as [`Duration::MAX`].
pub fn plan_batches(policy: &dyn TimingPolicy, arrivals: &[Duration]) -> Vec<PlannedBatch> {
    let mut sorted = arrivals.to_vec();
    sorted.sort_unstable();

    let base = Instant::now();
    let mut batches = Vec::new();
    let mut next = 0;

    while next < sorted.len() {
        let first = next;
        next += 1;

        let deadline = match base.checked_add(sorted[first]) {
            Some(start) => {
                let mut deadline = start.checked_add(policy.delay(start, start));
                while let (Some(due), Some(&offset)) = (deadline, sorted.get(next)) {
                    match base.checked_add(offset) {
                        Some(latest) if latest < due => {
                            deadline = latest.checked_add(policy.delay(start, latest));
                            next += 1;
                        }
                        _ => break,
                    }
                }
                deadline
            }
            None => None,
        };

        if deadline.is_none() {
            next = sorted.len();
        }

        batches.push(PlannedBatch {
            first,
            len: next - first,
            fires_at: deadline.map_or(Duration::MAX, |due| due - base),
        });
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_window_counts_down_from_first_query() {
        let policy = Window::from_millis(10);
        let start = Instant::now();

        assert_eq!(policy.delay(start, start), ms(10));
        assert_eq!(policy.delay(start, start + ms(2)), ms(8));
        assert_eq!(policy.delay(start, start + ms(5)), ms(5));
        // Past the window the batch is due immediately
        assert_eq!(policy.delay(start, start + ms(25)), Duration::ZERO);
    }

    #[test]
    fn test_buffer_ignores_timestamps() {
        let policy = Buffer::from_millis(10);
        let start = Instant::now();

        assert_eq!(policy.delay(start, start), ms(10));
        assert_eq!(policy.delay(start, start + ms(500)), ms(10));
    }

    #[test]
    fn test_capped_never_exceeds_max_wait() {
        let policy = Capped::new(ms(10), ms(25));
        let start = Instant::now();

        assert_eq!(policy.delay(start, start), ms(10));
        assert_eq!(policy.delay(start, start + ms(8)), ms(10));
        assert_eq!(policy.delay(start, start + ms(16)), ms(9));
        assert_eq!(policy.delay(start, start + ms(24)), ms(1));
        assert_eq!(policy.delay(start, start + ms(40)), Duration::ZERO);
    }

    #[test]
    fn test_closure_policy() {
        let policy = |_start: Instant, _latest: Instant| ms(3);
        let now = Instant::now();
        assert_eq!(policy.delay(now, now), ms(3));
    }

    #[test]
    fn test_plan_window_single_batch() {
        let batches = plan_batches(&Window::from_millis(10), &[ms(0), ms(2), ms(5), ms(5)]);

        assert_eq!(batches, vec![PlannedBatch { first: 0, len: 4, fires_at: ms(10) }]);
    }

    #[test]
    fn test_plan_buffer_defers_until_quiet() {
        let batches = plan_batches(&Buffer::from_millis(10), &[ms(0), ms(2), ms(5), ms(10)]);

        assert_eq!(batches, vec![PlannedBatch { first: 0, len: 4, fires_at: ms(20) }]);
    }

    #[test]
    fn test_plan_window_splits_late_arrivals() {
        let batches = plan_batches(&Window::from_millis(10), &[ms(0), ms(4), ms(10), ms(12)]);

        assert_eq!(
            batches,
            vec![
                PlannedBatch { first: 0, len: 2, fires_at: ms(10) },
                PlannedBatch { first: 2, len: 2, fires_at: ms(20) },
            ]
        );
    }

    #[test]
    fn test_plan_capped_and_empty() {
        let batches = plan_batches(&Capped::new(ms(10), ms(25)), &[ms(0), ms(8), ms(16), ms(24)]);
        assert_eq!(batches, vec![PlannedBatch { first: 0, len: 4, fires_at: ms(25) }]);

        assert!(plan_batches(&Window::from_millis(10), &[]).is_empty());
    }

    #[test]
    fn test_plan_unbounded_delay_never_fires() {
        let policy = |_start: Instant, _latest: Instant| Duration::MAX;
        let batches = plan_batches(&policy, &[ms(0), ms(5), ms(1_000)]);
        assert_eq!(batches, vec![PlannedBatch { first: 0, len: 3, fires_at: Duration::MAX }]);

        let batches = plan_batches(&Window(Duration::MAX), &[Duration::ZERO]);
        assert_eq!(batches[0].fires_at, Duration::MAX);

        // A finite batch followed by an arrival past the clock's range
        let batches = plan_batches(&Window::from_millis(10), &[ms(0), Duration::MAX]);
        assert_eq!(
            batches,
            vec![
                PlannedBatch { first: 0, len: 1, fires_at: ms(10) },
                PlannedBatch { first: 1, len: 1, fires_at: Duration::MAX },
            ]
        );
    }
}
