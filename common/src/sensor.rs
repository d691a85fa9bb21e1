use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, types::SensorReading};

pub const DEFAULT_K_COEFF: f32 = 120.0;
pub const DEFAULT_P_ZERO: f32 = 100.0;

// h = (p - p0) / k
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(rename = "kCoeff")]
    pub k_coeff: f32,
    #[serde(rename = "pZero")]
    pub p_zero: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            k_coeff: DEFAULT_K_COEFF,
            p_zero: DEFAULT_P_ZERO,
        }
    }
}

impl Calibration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.k_coeff.is_finite() || !(1.0..=1000.0).contains(&self.k_coeff) {
            return Err(ConfigError::OutOfRange {
                field: "kCoeff",
                min: 1.0,
                max: 1000.0,
            });
        }
        if !self.p_zero.is_finite() || !(-1000.0..=1000.0).contains(&self.p_zero) {
            return Err(ConfigError::OutOfRange {
                field: "pZero",
                min: -1000.0,
                max: 1000.0,
            });
        }
        Ok(())
    }

    pub fn sanitize(&mut self) {
        if self.validate().is_err() {
            *self = Self::default();
        }
    }

    pub fn depth_for_pressure(&self, pressure: f32) -> f32 {
        (pressure - self.p_zero) / self.k_coeff
    }
}

#[derive(Debug, Clone)]
pub struct DepthEstimator {
    window: usize,
    samples: VecDeque<f32>,
    last_pressure: Option<f32>,
}

impl DepthEstimator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            last_pressure: None,
        }
    }

    pub fn push(&mut self, pressure: f32, calibration: &Calibration) {
        if !pressure.is_finite() {
            return;
        }
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(calibration.depth_for_pressure(pressure));
        self.last_pressure = Some(pressure);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn reading(&self) -> Option<SensorReading> {
        let raw_pressure = self.last_pressure?;
        if self.samples.is_empty() {
            return None;
        }

        let count = self.samples.len() as f32;
        let mean = self.samples.iter().sum::<f32>() / count;
        let variance = self
            .samples
            .iter()
            .map(|depth| (depth - mean).powi(2))
            .sum::<f32>()
            / count;

        Some(SensorReading {
            depth: mean,
            depth_sd: variance.sqrt(),
            raw_pressure,
        })
    }
}
