use std::time::Duration;

use tokio::time::Instant;

use crate::types::TransferSummary;

#[derive(Debug, Clone)]
pub struct SpeedSampler {
    interval: Duration,
    last_bytes: u64,
    current_bytes: u64,
    samples: Vec<f64>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    running: bool,
}

impl SpeedSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_bytes: 0,
            current_bytes: 0,
            samples: Vec::new(),
            started_at: None,
            stopped_at: None,
            running: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self) {
        self.last_bytes = 0;
        self.current_bytes = 0;
        self.samples.clear();
        self.started_at = Some(Instant::now());
        self.stopped_at = None;
        self.running = true;
    }

    pub fn record(&mut self, bytes_so_far: u64) {
        self.current_bytes = self.current_bytes.max(bytes_so_far);
    }

    /// Takes one sample. A tick with no new bytes yields no sample but still
    /// rebases the counter, so bursty progress does not produce false zeroes.
    pub fn tick(&mut self) -> Option<f64> {
        if !self.running {
            return None;
        }

        let delta = self.current_bytes - self.last_bytes;
        self.last_bytes = self.current_bytes;

        let secs = self.interval.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        let speed = delta as f64 / secs;
        if speed > 0.0 {
            self.samples.push(speed);
            Some(speed)
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.stopped_at = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn finish(&mut self, total_bytes: u64) -> TransferSummary {
        self.stop();

        let duration = self.elapsed();
        let secs = duration.as_secs_f64();
        let average_speed = if secs > 0.0 {
            total_bytes as f64 / secs
        } else {
            0.0
        };

        let (sampled_average_speed, max_speed) = if self.samples.is_empty() {
            (average_speed, average_speed)
        } else {
            let sum: f64 = self.samples.iter().sum();
            let max = self.samples.iter().copied().fold(f64::MIN, f64::max);
            (sum / self.samples.len() as f64, max)
        };

        TransferSummary {
            total_bytes,
            duration,
            average_speed,
            sampled_average_speed,
            max_speed,
            ..Default::default()
        }
    }
}
