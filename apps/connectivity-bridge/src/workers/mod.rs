//! Blocking route workers. Each owns its wire object on a dedicated thread
//! and stops on request.

mod consumer;
mod producer;

use std::thread;
use std::time::{Duration, Instant};

pub use consumer::{ConsumerContext, ConsumerWorker};
pub use producer::{ProducerContext, ProducerWorker};

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub consumer_poll: Duration,
    pub producer_queue: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            consumer_poll: Duration::from_millis(100),
            producer_queue: 256,
        }
    }
}

pub fn consumer_name(connection_id: &str, address: &str) -> String {
    format!("{connection_id}/consumer/{address}")
}

pub fn producer_name(connection_id: &str, address: &str) -> String {
    format!("{connection_id}/producer/{address}")
}

/// Fixed one-second window limiter; zero means unthrottled.
#[derive(Debug)]
pub(crate) struct Throttle {
    per_second: u32,
    window_start: Instant,
    count: u32,
}

impl Throttle {
    const WINDOW: Duration = Duration::from_secs(1);

    pub(crate) fn new(per_second: u32) -> Self {
        Self {
            per_second,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Time to wait before the next message may pass.
    pub(crate) fn delay(&mut self, now: Instant) -> Option<Duration> {
        if self.per_second == 0 {
            return None;
        }
        if now.duration_since(self.window_start) >= Self::WINDOW {
            self.window_start = now;
            self.count = 0;
        }
        if self.count < self.per_second {
            self.count += 1;
            return None;
        }
        let wait = (self.window_start + Self::WINDOW).saturating_duration_since(now);
        self.window_start += Self::WINDOW;
        self.count = 1;
        Some(wait)
    }

    pub(crate) fn acquire(&mut self) {
        if let Some(wait) = self.delay(Instant::now()) {
            thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unthrottled_never_waits() {
        let mut throttle = Throttle::new(0);
        let now = Instant::now();
        assert!((0..1_000).all(|_| throttle.delay(now).is_none()));
    }

    #[test]
    fn throttle_waits_for_next_window() {
        let mut throttle = Throttle::new(2);
        let start = throttle.window_start;
        assert_eq!(throttle.delay(start), None);
        assert_eq!(throttle.delay(start), None);
        assert_eq!(throttle.delay(start), Some(Duration::from_secs(1)));
        let later = start + Duration::from_millis(1_500);
        assert_eq!(throttle.delay(later), None);
        assert_eq!(throttle.delay(later), Some(Duration::from_millis(500)));
    }

    #[test]
    fn worker_names_follow_routes() {
        assert_eq!(consumer_name("c-1", "queue/in"), "c-1/consumer/queue/in");
        assert_eq!(producer_name("c-1", "topic/out"), "c-1/producer/topic/out");
    }
}
