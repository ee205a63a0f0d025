/**
 * RATE CALCULATOR - Cumulative counters in, per-second rates out
 *
 * ROLE: keeps one baseline (last counters, receipt time, last rates) per
 * source. The hub's receipt time drives the math; the agent clock is never
 * trusted.
 *
 * POLICY:
 * - first reading for a source: all rates zero
 * - receipt time not moving forward: previous rates reused (clock anomaly)
 * - a counter going backwards: that rate is zero (counter reset)
 * - the baseline always advances to the latest reading
 */

use crate::models::{Counters, DerivedRates};
use parking_lot::Mutex;
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::warn;

/// Last reading seen for a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub counters: Counters,
    pub received_at: OffsetDateTime,
    pub rates: DerivedRates,
}

/// Irregularities absorbed by the rate policy. Logged, never returned as errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateAnomaly {
    /// Receipt time did not move forward; previous rates were reused.
    ClockAnomaly { elapsed_secs: f64 },
    /// At least one counter went backwards; its rate is zero for this interval.
    CounterReset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateOutcome {
    pub rates: DerivedRates,
    pub anomaly: Option<RateAnomaly>,
}

#[derive(Default)]
pub struct RateCalculator {
    baselines: Mutex<HashMap<String, Baseline>>,
}

impl RateCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives rates for `source_id` and always advances its baseline to
    /// `(counters, now)`.
    pub fn compute(&self, source_id: &str, counters: &Counters, now: OffsetDateTime) -> RateOutcome {
        let mut baselines = self.baselines.lock();

        let Some(previous) = baselines.get(source_id).copied() else {
            baselines.insert(
                source_id.to_string(),
                Baseline { counters: *counters, received_at: now, rates: DerivedRates::default() },
            );
            return RateOutcome { rates: DerivedRates::default(), anomaly: None };
        };

        let elapsed = (now - previous.received_at).as_seconds_f64();
        let outcome = if elapsed <= 0.0 {
            warn!(source_id, elapsed_secs = elapsed, "clock anomaly, keeping previous rates");
            RateOutcome {
                rates: previous.rates,
                anomaly: Some(RateAnomaly::ClockAnomaly { elapsed_secs: elapsed }),
            }
        } else {
            let prev = previous.counters;
            let (bytes_in, r1) = per_second(counters.bytes_recv, prev.bytes_recv, elapsed);
            let (bytes_out, r2) = per_second(counters.bytes_sent, prev.bytes_sent, elapsed);
            let (packets_in, r3) = per_second(counters.packets_recv, prev.packets_recv, elapsed);
            let (packets_out, r4) = per_second(counters.packets_sent, prev.packets_sent, elapsed);
            let reset = r1 || r2 || r3 || r4;
            if reset {
                warn!(source_id, "counter reset detected, rebasing");
            }
            RateOutcome {
                rates: DerivedRates {
                    bytes_in_per_sec: bytes_in,
                    bytes_out_per_sec: bytes_out,
                    packets_in_per_sec: packets_in,
                    packets_out_per_sec: packets_out,
                },
                anomaly: reset.then_some(RateAnomaly::CounterReset),
            }
        };

        baselines.insert(
            source_id.to_string(),
            Baseline { counters: *counters, received_at: now, rates: outcome.rates },
        );
        outcome
    }

    #[cfg(test)]
    pub fn baseline(&self, source_id: &str) -> Option<Baseline> {
        self.baselines.lock().get(source_id).copied()
    }

    #[cfg(test)]
    pub fn tracked_sources(&self) -> usize {
        self.baselines.lock().len()
    }
}

/// Returns the rounded rate and whether the counter went backwards.
fn per_second(current: u64, previous: u64, elapsed_secs: f64) -> (f64, bool) {
    match current.checked_sub(previous) {
        Some(delta) => (round2(delta as f64 / elapsed_secs), false),
        None => (0.0, true),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    fn sent(bytes_sent: u64) -> Counters {
        Counters { bytes_sent, ..Counters::default() }
    }

    fn full(n: u64) -> Counters {
        Counters { bytes_sent: n, bytes_recv: n * 2, packets_sent: n / 10, packets_recv: n / 5 }
    }

    #[test]
    fn test_first_observation_yields_zero() {
        let calc = RateCalculator::new();
        let t0 = datetime!(2025-01-01 0:00 UTC);
        let out = calc.compute("a", &full(5000), t0);
        assert_eq!(out.rates, DerivedRates::default());
        assert_eq!(out.anomaly, None);
        assert_eq!(calc.baseline("a").unwrap().counters, full(5000));
    }

    #[test]
    fn test_reset_example_sequence() {
        let calc = RateCalculator::new();
        let t0 = datetime!(2025-01-01 0:00 UTC);

        calc.compute("a", &sent(1000), t0);
        let out = calc.compute("a", &sent(1500), t0 + Duration::seconds(5));
        assert_eq!(out.rates.bytes_out_per_sec, 100.0);

        let out = calc.compute("a", &sent(200), t0 + Duration::seconds(10));
        assert_eq!(out.rates.bytes_out_per_sec, 0.0);
        assert_eq!(out.anomaly, Some(RateAnomaly::CounterReset));
        let base = calc.baseline("a").unwrap();
        assert_eq!(base.counters.bytes_sent, 200);
        assert_eq!(base.received_at, t0 + Duration::seconds(10));

        let out = calc.compute("a", &sent(700), t0 + Duration::seconds(15));
        assert_eq!(out.rates.bytes_out_per_sec, 100.0);
        assert_eq!(out.anomaly, None);
    }

    #[test]
    fn test_increasing_counters_match_delta_over_time() {
        let calc = RateCalculator::new();
        let mut t = datetime!(2025-01-01 0:00 UTC);
        let mut counters = full(0);
        calc.compute("a", &counters, t);

        for (step_ms, grow) in [(1_000i64, 1234u64), (2_500, 10), (333, 99_999), (7_000, 0)] {
            let next = Counters {
                bytes_sent: counters.bytes_sent + grow,
                bytes_recv: counters.bytes_recv + grow * 3,
                packets_sent: counters.packets_sent + 1,
                packets_recv: counters.packets_recv + 2,
            };
            t += Duration::milliseconds(step_ms);
            let out = calc.compute("a", &next, t);
            let secs = step_ms as f64 / 1000.0;
            assert!((out.rates.bytes_out_per_sec - grow as f64 / secs).abs() <= 0.005);
            assert!((out.rates.bytes_in_per_sec - (grow * 3) as f64 / secs).abs() <= 0.005);
            assert!((out.rates.packets_in_per_sec - 2.0 / secs).abs() <= 0.005);
            counters = next;
        }
    }

    #[test]
    fn test_clock_anomaly_keeps_previous_rate() {
        let calc = RateCalculator::new();
        let t0 = datetime!(2025-01-01 0:00 UTC);
        calc.compute("a", &sent(0), t0);
        let first = calc.compute("a", &sent(500), t0 + Duration::seconds(5));
        assert_eq!(first.rates.bytes_out_per_sec, 100.0);

        let same_instant = calc.compute("a", &sent(900), t0 + Duration::seconds(5));
        assert_eq!(same_instant.rates, first.rates);
        assert!(matches!(same_instant.anomaly, Some(RateAnomaly::ClockAnomaly { .. })));

        let backwards = calc.compute("a", &sent(1000), t0 + Duration::seconds(2));
        assert_eq!(backwards.rates, first.rates);

        // baseline still advanced to the latest reading
        let base = calc.baseline("a").unwrap();
        assert_eq!(base.counters.bytes_sent, 1000);
        assert_eq!(base.received_at, t0 + Duration::seconds(2));
    }

    #[test]
    fn test_rates_are_never_negative() {
        let calc = RateCalculator::new();
        let t0 = datetime!(2025-01-01 0:00 UTC);
        calc.compute("a", &full(10_000), t0);
        let out = calc.compute("a", &full(10), t0 + Duration::seconds(1));
        let r = out.rates;
        for v in [r.bytes_in_per_sec, r.bytes_out_per_sec, r.packets_in_per_sec, r.packets_out_per_sec] {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_rounding_to_two_decimals() {
        let calc = RateCalculator::new();
        let t0 = datetime!(2025-01-01 0:00 UTC);
        calc.compute("a", &sent(0), t0);
        let out = calc.compute("a", &sent(100), t0 + Duration::seconds(3));
        assert_eq!(out.rates.bytes_out_per_sec, 33.33);
    }

    #[test]
    fn test_sources_do_not_share_baselines() {
        let t0 = datetime!(2025-01-01 0:00 UTC);
        let seq_a: Vec<(Counters, OffsetDateTime)> =
            (0..50u64).map(|i| (full(i * 1000), t0 + Duration::seconds(i as i64))).collect();
        let seq_b: Vec<(Counters, OffsetDateTime)> =
            (0..30u64).map(|i| (full(i * 77), t0 + Duration::milliseconds(i as i64 * 1500))).collect();

        let sequential = RateCalculator::new();
        for (c, t) in &seq_a {
            sequential.compute("a", c, *t);
        }
        for (c, t) in &seq_b {
            sequential.compute("b", c, *t);
        }

        let concurrent = RateCalculator::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                for (c, t) in &seq_a {
                    concurrent.compute("a", c, *t);
                }
            });
            s.spawn(|| {
                for (c, t) in &seq_b {
                    concurrent.compute("b", c, *t);
                }
            });
        });

        assert_eq!(sequential.baseline("a"), concurrent.baseline("a"));
        assert_eq!(sequential.baseline("b"), concurrent.baseline("b"));
        assert_eq!(concurrent.tracked_sources(), 2);
    }
}
