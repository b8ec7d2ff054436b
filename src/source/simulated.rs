//! Simulated acquisition.
//!
//! Stands in for the hardware channel when no device is attached: on every tick of a
//! fixed ticker it emits one reading per sensor, all stamped with the same tick
//! number, with values drawn uniformly from `[0, 1)`.

use super::SourceReader;
use crate::error::AppResult;
use crate::sensor::{Reading, ReadingGroup};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Ticker-paced random source.
pub struct SimulatedSource {
    sensor_count: usize,
    ticker: Interval,
    tick: u64,
    rng: ChaCha8Rng,
}

impl SimulatedSource {
    /// Create a source for `sensor_count` sensors.
    ///
    /// With a seed the value sequence is reproducible; without one it is seeded from
    /// the OS. The first tick fires immediately.
    pub fn new(sensor_count: usize, period: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            sensor_count,
            ticker,
            tick: 0,
            rng,
        }
    }

    /// Ticks emitted so far
    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

#[async_trait]
impl SourceReader for SimulatedSource {
    async fn next_readings(&mut self) -> AppResult<ReadingGroup> {
        self.ticker.tick().await;

        let timestamp = self.tick as f64;
        let readings = (0..self.sensor_count)
            .map(|index| Reading::new(index, timestamp, self.rng.gen::<f64>()))
            .collect();
        self.tick += 1;

        Ok(readings)
    }

    fn describe(&self) -> String {
        format!(
            "simulated ({} sensors, {:?} tick)",
            self.sensor_count,
            self.ticker.period()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_emits_one_reading_per_sensor_per_tick() {
        let mut source = SimulatedSource::new(3, Duration::from_secs(1), Some(7));

        for expected_tick in 0..5u64 {
            let readings = source.next_readings().await.unwrap();
            assert_eq!(readings.len(), 3);
            for (index, reading) in readings.iter().enumerate() {
                assert_eq!(reading.sensor_index, index);
                assert_eq!(reading.timestamp_s, expected_tick as f64);
                assert!((0.0..1.0).contains(&reading.value));
            }
        }
        assert_eq!(source.ticks(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_paced_by_the_period() {
        let mut source = SimulatedSource::new(1, Duration::from_secs(1), Some(1));
        let start = Instant::now();

        source.next_readings().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        source.next_readings().await.unwrap();
        source.next_readings().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_reproduces_values() {
        let mut a = SimulatedSource::new(2, Duration::from_millis(10), Some(42));
        let mut b = SimulatedSource::new(2, Duration::from_millis(10), Some(42));
        for _ in 0..3 {
            assert_eq!(a.next_readings().await.unwrap(), b.next_readings().await.unwrap());
        }
    }
}
