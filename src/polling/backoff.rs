use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Wait inserted between two attempts on the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// Next attempt starts as soon as the previous one settles.
    Immediate,
    Fixed(Duration),
    /// Doubles after every unsuccessful attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl DelayPolicy {
    /// Delay before the attempt that follows `settled_attempts` unsuccessful ones.
    pub fn delay_after(&self, settled_attempts: u32) -> Duration {
        match *self {
            DelayPolicy::Immediate => Duration::ZERO,
            DelayPolicy::Fixed(delay) => delay,
            DelayPolicy::Exponential { initial, max } => {
                let mut delay = initial;
                for _ in 1..settled_attempts {
                    delay = next_backoff(delay, max);
                    if delay >= max {
                        break;
                    }
                }
                delay.min(max)
            }
        }
    }
}

pub(crate) enum SleepOutcome {
    Elapsed,
    Cancelled,
}

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> SleepOutcome {
    if delay.is_zero() {
        yield_now().await;
        return if cancellation.is_cancelled() {
            SleepOutcome::Cancelled
        } else {
            SleepOutcome::Elapsed
        };
    }

    tokio::select! {
        _ = cancellation.cancelled() => SleepOutcome::Cancelled,
        _ = sleep(delay) => SleepOutcome::Elapsed,
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
