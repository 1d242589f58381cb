//! Restartable, optionally bounded interval clock

use crate::cue::Payload;
use crate::dispatcher::Dispatcher;
use crate::{events, Error, Result};
use log::{debug, trace};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Periodic tick source driven by the host loop.
///
/// The ticker itself never sleeps or spawns. The host calls [`Ticker::poll`]
/// from its loop and interval deadlines that have passed since
/// [`Ticker::start`] produce ticks. A bounded ticker catches up on every
/// missed deadline; an unbounded one fires once per poll and skips the rest,
/// keeping its original phase. Each tick dispatches [`events::TIME`]
/// with `{count, remain}`; a bounded ticker that reaches its count stops
/// itself and dispatches [`events::COMPLETE`]. A completed ticker ignores
/// `start()` until it is `reset()`.
#[derive(Debug)]
pub struct Ticker {
    delay: Duration,
    limit: Option<u64>,
    count: u64,
    running: bool,
    next_due: Option<Instant>,
    dispatcher: Dispatcher,
}

impl Ticker {
    /// Creates a stopped ticker. A zero delay is rejected.
    pub fn new(delay: Duration, limit: Option<u64>) -> Result<Self> {
        if delay.is_zero() {
            return Err(Error::InvalidDelay);
        }
        Ok(Self {
            delay,
            limit,
            count: 0,
            running: false,
            next_due: None,
            dispatcher: Dispatcher::new("ticker"),
        })
    }

    /// Dispatcher carrying `time` and `complete`
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Ticks fired since the last reset
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.count >= limit)
    }

    /// Starts ticking from now. No-op while already running.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Starts ticking with the first deadline one delay after `now`
    pub fn start_at(&mut self, now: Instant) {
        if self.running {
            return;
        }
        if self.exhausted() {
            debug!("ticker already completed {} ticks; reset before restarting", self.count);
            return;
        }
        self.running = true;
        self.next_due = Some(now + self.delay);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.next_due = None;
    }

    /// Zeroes the counter and stops
    pub fn reset(&mut self) {
        self.count = 0;
        self.stop();
    }

    pub fn toggle(&mut self) {
        if self.running {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Fires the ticks whose deadline is at or before `now`.
    ///
    /// Bounded tickers fire one tick per elapsed deadline. Unbounded tickers
    /// fire at most one and move to the first deadline after `now`, so a
    /// stalled host loop does not flood listeners when it resumes.
    ///
    /// Returns how many ticks fired. A handler error aborts the poll.
    pub fn poll(&mut self, now: Instant) -> Result<u32> {
        let mut fired = 0;
        while self.running {
            let Some(due) = self.next_due.filter(|due| *due <= now) else {
                break;
            };
            if self.limit.is_none() {
                let next = self.first_deadline_after(due, now);
                let skipped = (next - due).as_nanos() / self.delay.as_nanos() - 1;
                if skipped > 0 {
                    debug!("ticker skipped {} missed ticks", skipped);
                }
                self.next_due = Some(next);
                self.tick()?;
                return Ok(1);
            }
            self.next_due = Some(due + self.delay);
            self.tick()?;
            fired += 1;
        }
        Ok(fired)
    }

    /// First deadline strictly after `now` on the grid starting at `due`
    fn first_deadline_after(&self, due: Instant, now: Instant) -> Instant {
        let steps = (now - due).as_nanos() / self.delay.as_nanos() + 1;
        u32::try_from(steps)
            .ok()
            .and_then(|steps| self.delay.checked_mul(steps))
            .and_then(|offset| due.checked_add(offset))
            .unwrap_or(now + self.delay)
    }

    /// Fires a single tick immediately
    pub fn tick(&mut self) -> Result<()> {
        self.count += 1;
        let remain = match self.limit {
            Some(limit) => json!(limit as i64 - self.count as i64),
            None => Value::Null,
        };
        trace!("tick {} (remain {})", self.count, remain);

        let mut payload = Payload::new();
        payload.insert("count".to_string(), json!(self.count));
        payload.insert("remain".to_string(), remain);
        self.dispatcher.dispatch(events::TIME, Some(payload))?;

        if self.exhausted() {
            self.stop();
            self.dispatcher.dispatch(events::COMPLETE, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(ticker: &Ticker) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        ticker.dispatcher().listen(events::TIME, move |event, _| {
            l.lock().unwrap().push(format!(
                "time {} {}",
                event.get("count").unwrap(),
                event.get("remain").unwrap()
            ));
            Ok(())
        });
        let l = Arc::clone(&log);
        ticker.dispatcher().listen(events::COMPLETE, move |_, _| {
            l.lock().unwrap().push("complete".to_string());
            Ok(())
        });
        log
    }

    #[test]
    fn test_zero_delay_rejected() {
        assert!(matches!(
            Ticker::new(Duration::ZERO, None),
            Err(Error::InvalidDelay)
        ));
    }

    #[test]
    fn test_bounded_ticker_completes() {
        let mut ticker = Ticker::new(Duration::from_millis(100), Some(3)).unwrap();
        let log = recorder(&ticker);
        let t0 = Instant::now();

        ticker.start_at(t0);
        assert_eq!(ticker.poll(t0 + Duration::from_secs(10)).unwrap(), 3);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["time 1 2", "time 2 1", "time 3 0", "complete"]
        );
        assert!(!ticker.is_running());

        // Completed ticker refuses to restart until reset
        ticker.start_at(t0);
        assert!(!ticker.is_running());
        assert_eq!(ticker.poll(t0 + Duration::from_secs(20)).unwrap(), 0);

        ticker.reset();
        ticker.start_at(t0);
        assert!(ticker.is_running());
        assert_eq!(ticker.count(), 0);
    }

    #[test]
    fn test_poll_fires_only_elapsed_deadlines() {
        let mut ticker = Ticker::new(Duration::from_millis(100), None).unwrap();
        let log = recorder(&ticker);
        let t0 = Instant::now();

        ticker.start_at(t0);
        assert_eq!(ticker.poll(t0 + Duration::from_millis(50)).unwrap(), 0);
        assert_eq!(ticker.poll(t0 + Duration::from_millis(100)).unwrap(), 1);
        // 200 and 300 both passed: one tick, the next deadline stays on the grid
        assert_eq!(ticker.poll(t0 + Duration::from_millis(350)).unwrap(), 1);
        assert_eq!(ticker.count(), 2);
        assert_eq!(ticker.poll(t0 + Duration::from_millis(399)).unwrap(), 0);
        assert_eq!(ticker.poll(t0 + Duration::from_millis(400)).unwrap(), 1);
        assert_eq!(log.lock().unwrap()[0], "time 1 null");
    }

    #[test]
    fn test_unbounded_ticker_skips_ticks_missed_during_a_stall() {
        let mut ticker = Ticker::new(Duration::from_millis(100), None).unwrap();
        let log = recorder(&ticker);
        let t0 = Instant::now();

        ticker.start_at(t0);
        let resumed = t0 + Duration::from_secs(3600);
        assert_eq!(ticker.poll(resumed).unwrap(), 1);
        assert_eq!(ticker.count(), 1);
        assert_eq!(log.lock().unwrap().len(), 1);

        assert_eq!(ticker.poll(resumed + Duration::from_millis(99)).unwrap(), 0);
        assert_eq!(ticker.poll(resumed + Duration::from_millis(100)).unwrap(), 1);
        assert_eq!(ticker.count(), 2);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut ticker = Ticker::new(Duration::from_millis(100), None).unwrap();
        let t0 = Instant::now();
        ticker.start_at(t0);
        // A second start must not push the deadline back
        ticker.start_at(t0 + Duration::from_millis(90));
        assert_eq!(ticker.poll(t0 + Duration::from_millis(100)).unwrap(), 1);
    }

    #[test]
    fn test_stop_reset_toggle() {
        let mut ticker = Ticker::new(Duration::from_millis(10), None).unwrap();
        let t0 = Instant::now();
        ticker.start_at(t0);
        ticker.poll(t0 + Duration::from_millis(10)).unwrap();
        ticker.poll(t0 + Duration::from_millis(20)).unwrap();
        ticker.poll(t0 + Duration::from_millis(30)).unwrap();
        assert_eq!(ticker.count(), 3);

        ticker.stop();
        assert!(!ticker.is_running());
        assert_eq!(ticker.poll(t0 + Duration::from_secs(1)).unwrap(), 0);
        assert_eq!(ticker.count(), 3);

        ticker.toggle();
        assert!(ticker.is_running());
        ticker.toggle();
        assert!(!ticker.is_running());

        ticker.reset();
        assert_eq!(ticker.count(), 0);
        assert!(!ticker.is_running());
    }
}
