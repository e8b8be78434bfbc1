use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::interval;

use crate::config::Config;
use crate::state_machine::TriggerSource;

/// The I2C VL53L0X/VL53L1X driver is an out-of-scope collaborator;
/// this trait is the capability interface the trigger polls, returning
/// millimetres or `None` on read failure.
pub trait DistanceReader: Send {
    fn read(&mut self) -> Option<u32>;
    fn reinit(&mut self) {}
}

/// Used when no distance sensor is present: always reports absent, so the
/// feature disables itself with a startup warning rather than the core
/// treating it as a hard dependency.
pub struct NullDistanceReader;

impl DistanceReader for NullDistanceReader {
    fn read(&mut self) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollRate {
    Idle,
    Active,
}

impl PollRate {
    fn period(self) -> Duration {
        match self {
            PollRate::Idle => Duration::from_secs(1), // ~1 Hz
            PollRate::Active => Duration::from_millis(200), // ~5 Hz
        }
    }
}

const DEBOUNCE: Duration = Duration::from_millis(250);
const PERIODIC_PUBLISH: Duration = Duration::from_secs(5);
const REINIT_AFTER_FAILURES: u32 = 3;

/// Polls a `DistanceReader` at a cadence driven by the caller's current
/// session state, emitting a debounced `Distance` trigger when the
/// reading crosses below threshold, and a periodic sensor-value publish
/// every 5s regardless of state.
pub struct DistanceTrigger {
    reader: Box<dyn DistanceReader>,
    consecutive_failures: u32,
    sticky_since: Option<Instant>,
    last_publish: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistanceOutput {
    Trigger(TriggerSource),
    SensorValue(Option<u32>),
}

impl DistanceTrigger {
    pub fn new(reader: Box<dyn DistanceReader>) -> Self {
        Self {
            reader,
            consecutive_failures: 0,
            sticky_since: None,
            last_publish: None,
        }
    }

    /// Runs until `active` (a `watch`-style signal for "we're in a state
    /// that polls at 5 Hz") or the output channel closes. Meant to run on
    /// its own task inside the core's event loop's orbit, feeding triggers
    /// back through `tx`.
    pub async fn run(
        mut self,
        config_rx: tokio::sync::watch::Receiver<std::sync::Arc<Config>>,
        mut is_active: tokio::sync::watch::Receiver<bool>,
        tx: mpsc::Sender<DistanceOutput>,
    ) {
        loop {
            let rate = if *is_active.borrow() {
                PollRate::Active
            } else {
                PollRate::Idle
            };
            let mut ticker = interval(rate.period());
            tokio::select! {
                _ = ticker.tick() => {
                    let config = config_rx.borrow().clone();
                    if let Some(outputs) = self.poll_once(&config) {
                        for out in outputs {
                            if tx.send(out).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                changed = is_active.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Pure-ish polling step, split out for unit testing without a runtime.
    pub fn poll_once(&mut self, config: &Config) -> Option<Vec<DistanceOutput>> {
        let mut out = Vec::new();
        let reading = self.reader.read();

        match reading {
            Some(_) => self.consecutive_failures = 0,
            None => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= REINIT_AFTER_FAILURES {
                    log::warn!("distance sensor failed {REINIT_AFTER_FAILURES} times, reinitializing");
                    self.reader.reinit();
                    self.consecutive_failures = 0;
                }
            }
        }

        let now = Instant::now();
        if self
            .last_publish
            .map(|t| now.duration_since(t) >= PERIODIC_PUBLISH)
            .unwrap_or(true)
        {
            self.last_publish = Some(now);
            out.push(DistanceOutput::SensorValue(reading));
        }

        if let Some(mm) = reading {
            if config.distance_activation && mm < config.distance_activation_threshold_mm {
                let sticky = self
                    .sticky_since
                    .map(|t| now.duration_since(t) < DEBOUNCE)
                    .unwrap_or(false);
                if !sticky {
                    self.sticky_since = Some(now);
                    out.push(DistanceOutput::Trigger(TriggerSource::Distance { mm }));
                }
            } else {
                self.sticky_since = None;
            }
        }

        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedReader {
        readings: VecDeque<Option<u32>>,
        pub reinit_count: u32,
    }

    impl DistanceReader for ScriptedReader {
        fn read(&mut self) -> Option<u32> {
            self.readings.pop_front().unwrap_or(None)
        }
        fn reinit(&mut self) {
            self.reinit_count += 1;
        }
    }

    fn cfg() -> Config {
        let mut c = Config::default();
        c.distance_activation = true;
        c.distance_activation_threshold_mm = 150;
        c
    }

    #[test]
    fn crossing_threshold_emits_a_debounced_trigger() {
        let reader = Box::new(ScriptedReader {
            readings: VecDeque::from([Some(90)]),
            reinit_count: 0,
        });
        let mut trig = DistanceTrigger::new(reader);
        let out = trig.poll_once(&cfg()).unwrap();
        assert!(out
            .iter()
            .any(|o| matches!(o, DistanceOutput::Trigger(TriggerSource::Distance { mm: 90 }))));
    }

    #[test]
    fn three_consecutive_failures_trigger_reinit() {
        let reader_raw = ScriptedReader {
            readings: VecDeque::from([None, None, None]),
            reinit_count: 0,
        };
        let mut trig = DistanceTrigger::new(Box::new(reader_raw));
        for _ in 0..3 {
            trig.poll_once(&cfg());
        }
        // reinit happened inside trig; can't observe reinit_count directly
        // through the trait object, but a fourth poll should show failures
        // reset (no panic, no unbounded growth) by not reinitializing twice
        // in a row without three more failures.
        assert_eq!(trig.consecutive_failures, 0);
    }

    #[test]
    fn read_failure_returns_none_reading_not_a_trigger() {
        let reader = Box::new(ScriptedReader {
            readings: VecDeque::from([None]),
            reinit_count: 0,
        });
        let mut trig = DistanceTrigger::new(reader);
        let out = trig.poll_once(&cfg());
        // First poll also emits the periodic sensor value with None.
        assert!(out.unwrap().iter().all(|o| !matches!(o, DistanceOutput::Trigger(_))));
    }
}
