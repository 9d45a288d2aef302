use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use crate::error::SourceError;
use crate::source::{SampleSource, SourceEvent};

const BEATS_PER_MINUTE: f32 = 72.0;
// 12-bit ADC midpoint, the range a hobby ECG front end reports.
const BASELINE: f32 = 2048.0;

/// Gaussian bump of one ECG wave: (centre as fraction of the beat, width, height).
const WAVES: [(f32, f32, f32); 5] = [
    (0.16, 0.025, 150.0),  // P
    (0.27, 0.008, -120.0), // Q
    (0.30, 0.010, 1500.0), // R
    (0.33, 0.010, -300.0), // S
    (0.55, 0.040, 350.0),  // T
];

/// Synthetic ECG generator standing in for a device, paced at the sample rate.
pub struct SimulatedSource {
    sample_rate_hz: u32,
    index: u64,
    paced: bool,
    next_due: Instant,
}

impl SimulatedSource {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1),
            index: 0,
            paced: true,
            next_due: Instant::now(),
        }
    }

    /// Produce samples as fast as they are asked for.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn value_at(&self, index: u64) -> f32 {
        let seconds = index as f64 / self.sample_rate_hz as f64;
        let beat_len = 60.0 / BEATS_PER_MINUTE as f64;
        let phase = (seconds % beat_len / beat_len) as f32;
        let wander = 40.0 * (TAU * 0.25 * seconds as f32).sin();
        let waves: f32 = WAVES
            .iter()
            .map(|&(centre, width, height)| {
                let d = (phase - centre) / width;
                height * (-0.5 * d * d).exp()
            })
            .sum();
        BASELINE + wander + waves
    }
}

impl SampleSource for SimulatedSource {
    fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        if self.paced {
            let now = Instant::now();
            if self.next_due > now {
                std::thread::sleep(self.next_due - now);
            }
            self.next_due += Duration::from_secs_f64(1.0 / self.sample_rate_hz as f64);
        }
        let value = self.value_at(self.index);
        self.index += 1;
        Ok(SourceEvent::Value(value))
    }

    fn describe(&self) -> String {
        format!("simulated ECG @ {} Hz", self.sample_rate_hz)
    }
}
