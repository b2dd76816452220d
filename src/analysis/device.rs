//! Device-class timeouts with per-run escalation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::PipelineConfig;

/// Class of device the analysis was requested from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Tablet,
    Mobile,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Tablet => "tablet",
            Self::Mobile => "mobile",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "tablet" => Some(Self::Tablet),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }

    pub fn base_timeout(&self, config: &PipelineConfig) -> Duration {
        let ms = match self {
            Self::Desktop => config.desktop_timeout_ms,
            Self::Tablet => config.tablet_timeout_ms,
            Self::Mobile => config.mobile_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    /// Whether timeouts escalate after a timeout failure.
    pub fn escalates(&self) -> bool {
        matches!(self, Self::Tablet | Self::Mobile)
    }
}

/// Current call timeout for one run.
///
/// Escalations are sticky: once raised, the timeout stays raised for every
/// later call in the same run.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    device: DeviceClass,
    current: Duration,
    max: Duration,
    factor: f32,
}

impl TimeoutPolicy {
    pub fn new(device: DeviceClass, config: &PipelineConfig) -> Self {
        Self {
            device,
            current: device.base_timeout(config),
            max: config.max_timeout(),
            factor: config.timeout_escalation.max(1.0),
        }
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Raise the timeout after a timeout failure. Returns whether it changed.
    pub fn escalate(&mut self) -> bool {
        if !self.device.escalates() || self.current >= self.max {
            return false;
        }
        self.current = self.current.mul_f32(self.factor).min(self.max);
        true
    }
}
