use core::time::Duration;
use std::time::Instant;

/// Token bucket spacing out requests to one domain. Capacity one: collegiate
/// sites get no bursts, just a steady minimum interval.
#[derive(Debug)]
pub struct TokenBucket {
    interval: Duration,
    last_taken: Option<Instant>,
}

impl TokenBucket {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_taken: None,
        }
    }

    /// Takes a token if one is available, otherwise returns how long to wait
    /// before asking again. Callers sleep outside the lock and retry.
    pub fn poll(&mut self, now: Instant) -> Result<(), Duration> {
        match self.last_taken {
            Some(last) => {
                let elapsed = now.duration_since(last);
                if elapsed >= self.interval {
                    self.last_taken = Some(now);
                    Ok(())
                } else {
                    Err(self.interval - elapsed)
                }
            }
            None => {
                self.last_taken = Some(now);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_free_then_spaced() {
        let mut bucket = TokenBucket::new(Duration::from_secs(4));
        let t0 = Instant::now();

        assert!(bucket.poll(t0).is_ok());
        let wait = bucket.poll(t0 + Duration::from_secs(1)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(3));
        assert!(bucket.poll(t0 + Duration::from_secs(4)).is_ok());
    }

    #[test]
    fn wait_shrinks_as_time_passes() {
        let mut bucket = TokenBucket::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(bucket.poll(t0).is_ok());
        let w1 = bucket.poll(t0 + Duration::from_secs(2)).unwrap_err();
        let w2 = bucket.poll(t0 + Duration::from_secs(8)).unwrap_err();
        assert!(w2 < w1);
    }
}
