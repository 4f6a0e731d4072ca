//! # Cooperative Scheduler
//!
//! Single-threaded, deadline-driven service runner.
//!
//! Every service exposes one non-blocking `step(now)` that makes a bounded
//! amount of progress and answers with the time it wants to run next. The
//! scheduler keeps a due time per service and, on each pass, steps every
//! service whose due time has arrived: high priority first, then earliest
//! due. There is no preemption and no internal timer beyond the sleep until
//! the earliest deadline.

use std::future::Future;

use chrono::Utc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

/// Seconds between polls of a halted service
const HALT_POLL_SECS: u32 = 1;

/// When a service wants to be stepped again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextWake {
    /// At or after this Unix time (seconds)
    At(u32),
    /// On the next scheduler pass
    Soon,
    /// Service is stopped; poll occasionally for a restart
    Halt,
}

/// Scheduling class; `High` services run first within a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Low,
}

/// A cooperatively scheduled task
pub trait Service: Send {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Current scheduling class
    fn priority(&self) -> Priority;

    /// Make one bounded step of progress
    fn step(&mut self, now: u32) -> NextWake;
}

/// Wall-clock source in Unix seconds
pub trait Clock: Send {
    fn now(&self) -> u32;
}

/// [`Clock`] backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        Utc::now().timestamp().max(0) as u32
    }
}

struct Entry {
    service: Box<dyn Service>,
    due: u32,
}

/// Deadline scheduler over boxed services
pub struct Scheduler {
    entries: Vec<Entry>,
    clock: Box<dyn Clock>,
}

impl Scheduler {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            entries: Vec::new(),
            clock,
        }
    }

    /// Register a service, due immediately
    pub fn add(&mut self, service: Box<dyn Service>) {
        debug!("Scheduling service {}", service.name());
        self.entries.push(Entry { service, due: 0 });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Step every service that is due at `now`, once each
    ///
    /// # Returns
    ///
    /// * `Option<u32>` - Earliest due time after the pass, `None` with no services
    pub fn run_due(&mut self, now: u32) -> Option<u32> {
        let mut due: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].due <= now)
            .collect();
        due.sort_by_key(|&i| (self.entries[i].service.priority(), self.entries[i].due));

        for i in due {
            let entry = &mut self.entries[i];
            entry.due = match entry.service.step(now) {
                NextWake::At(t) => t,
                NextWake::Soon => now,
                NextWake::Halt => now + HALT_POLL_SECS,
            };
        }

        self.entries.iter().map(|e| e.due).min()
    }

    /// Drive the services until `shutdown` completes
    ///
    /// Sleeps between passes until the earliest deadline; yields to the
    /// runtime between back-to-back passes when something is already due.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        info!("Scheduler running {} services", self.entries.len());

        loop {
            let now = self.clock.now();
            let next = match self.run_due(now) {
                Some(next) => next,
                None => break,
            };

            let wait = next.saturating_sub(self.clock.now());
            tokio::select! {
                _ = sleep(Duration::from_secs(wait as u64)), if wait > 0 => {}
                _ = tokio::task::yield_now(), if wait == 0 => {}
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Run one final pass at the current time, used after signalling a stop
    pub fn drain(&mut self) {
        let now = self.clock.now();
        for entry in self.entries.iter_mut() {
            entry.due = 0;
        }
        self.run_due(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Service that records every step and replays a fixed schedule
    struct Recorder {
        name: &'static str,
        priority: Priority,
        wakes: Vec<NextWake>,
        log: Arc<Mutex<Vec<(&'static str, u32)>>>,
    }

    impl Service for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn step(&mut self, now: u32) -> NextWake {
            self.log.lock().unwrap().push((self.name, now));
            if self.wakes.is_empty() {
                NextWake::Halt
            } else {
                self.wakes.remove(0)
            }
        }
    }

    struct FixedClock(u32);

    impl Clock for FixedClock {
        fn now(&self) -> u32 {
            self.0
        }
    }

    fn recorder(
        name: &'static str,
        priority: Priority,
        wakes: Vec<NextWake>,
        log: &Arc<Mutex<Vec<(&'static str, u32)>>>,
    ) -> Box<dyn Service> {
        Box::new(Recorder {
            name,
            priority,
            wakes,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_empty_scheduler_has_no_deadline() {
        let mut scheduler = Scheduler::new(Box::new(FixedClock(0)));
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.run_due(100), None);
    }

    #[test]
    fn test_high_priority_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(Box::new(FixedClock(0)));
        scheduler.add(recorder("uplink", Priority::Low, vec![NextWake::At(200)], &log));
        scheduler.add(recorder("datalog", Priority::High, vec![NextWake::At(105)], &log));

        let next = scheduler.run_due(100);

        assert_eq!(*log.lock().unwrap(), vec![("datalog", 100), ("uplink", 100)]);
        assert_eq!(next, Some(105));
    }

    #[test]
    fn test_only_due_services_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(Box::new(FixedClock(0)));
        scheduler.add(recorder("a", Priority::Low, vec![NextWake::At(110), NextWake::At(120)], &log));
        scheduler.add(recorder("b", Priority::Low, vec![NextWake::At(150)], &log));

        scheduler.run_due(100);
        let next = scheduler.run_due(110);

        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", 100), ("b", 100), ("a", 110)]
        );
        assert_eq!(next, Some(120));
    }

    #[test]
    fn test_soon_and_halt_deadlines() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(Box::new(FixedClock(0)));
        scheduler.add(recorder("soon", Priority::Low, vec![NextWake::Soon], &log));
        assert_eq!(scheduler.run_due(50), Some(50));

        let mut scheduler = Scheduler::new(Box::new(FixedClock(0)));
        scheduler.add(recorder("halt", Priority::Low, vec![NextWake::Halt], &log));
        assert_eq!(scheduler.run_due(50), Some(50 + HALT_POLL_SECS));
    }

    #[test]
    fn test_past_deadline_runs_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(Box::new(FixedClock(0)));
        scheduler.add(recorder("catchup", Priority::Low, vec![NextWake::At(10), NextWake::At(20)], &log));

        scheduler.run_due(100);
        scheduler.run_due(100);

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(Box::new(FixedClock(1_000)));
        scheduler.add(recorder("idle", Priority::Low, vec![NextWake::At(5_000)], &log));

        tokio_test::block_on(scheduler.run(async {}));

        assert_eq!(*log.lock().unwrap(), vec![("idle", 1_000)]);
    }
}
