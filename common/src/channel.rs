use serde::{Deserialize, Serialize};

use crate::{config::ChannelHardwareConfig, error::ConfigError, types::ChannelStatus};

pub const SUPPORTED_RESOLUTIONS: [u8; 4] = [8, 10, 12, 15];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub id: usize,
    pub enabled: bool,
    #[serde(rename = "minLimit")]
    pub min_limit: u16,
    #[serde(rename = "maxLimit")]
    pub max_limit: u16,
    #[serde(rename = "currentOutput", default)]
    pub current_output: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    id: usize,
    pin: u8,
    resolution: u8,
    enabled: bool,
    min_limit: u16,
    max_limit: u16,
    current_output: u16,
}

impl Channel {
    pub fn new(id: usize, hardware: ChannelHardwareConfig) -> Result<Self, ConfigError> {
        if !SUPPORTED_RESOLUTIONS.contains(&hardware.resolution) {
            return Err(ConfigError::UnsupportedResolution(hardware.resolution));
        }
        let max_pwm = max_pwm_for(hardware.resolution);
        Ok(Self {
            id,
            pin: hardware.pin,
            resolution: hardware.resolution,
            enabled: true,
            min_limit: 0,
            max_limit: max_pwm,
            current_output: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn min_limit(&self) -> u16 {
        self.min_limit
    }

    pub fn max_limit(&self) -> u16 {
        self.max_limit
    }

    pub fn current_output(&self) -> u16 {
        self.current_output
    }

    pub fn max_pwm(&self) -> u16 {
        max_pwm_for(self.resolution)
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        true
    }

    pub fn set_limits(&mut self, min_limit: u16, max_limit: u16) -> Result<bool, ConfigError> {
        if min_limit > max_limit || max_limit > self.max_pwm() {
            return Err(ConfigError::InvalidLimits {
                min: min_limit,
                max: max_limit,
                resolution: self.resolution,
            });
        }
        let changed = self.min_limit != min_limit || self.max_limit != max_limit;
        self.min_limit = min_limit;
        self.max_limit = max_limit;
        Ok(changed)
    }

    pub fn clamp(&self, value: u16) -> u16 {
        value.clamp(self.min_limit, self.max_limit)
    }

    pub fn scale_percent(&self, percent: f64) -> u16 {
        let span = f64::from(self.max_limit - self.min_limit);
        let raw = f64::from(self.min_limit) + span * percent / 100.0;
        let bounded = raw
            .round()
            .clamp(f64::from(self.min_limit), f64::from(self.max_limit));
        self.clamp(bounded as u16)
    }

    pub fn effective_output(&self, value: u16) -> u16 {
        if self.enabled {
            self.clamp(value)
        } else {
            0
        }
    }

    pub fn apply_output(&mut self, value: u16) -> Option<u16> {
        let effective = self.effective_output(value);
        if effective == self.current_output {
            return None;
        }
        self.current_output = effective;
        Some(effective)
    }

    pub fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            id: self.id,
            enabled: self.enabled,
            min_limit: self.min_limit,
            max_limit: self.max_limit,
            current_output: self.current_output,
        }
    }

    pub fn restore(&mut self, settings: &ChannelSettings) {
        self.enabled = settings.enabled;
        if self.set_limits(settings.min_limit, settings.max_limit).is_err() {
            self.min_limit = 0;
            self.max_limit = self.max_pwm();
        }
        self.current_output = self.effective_output(settings.current_output);
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            id: self.id,
            pin: self.pin,
            resolution: self.resolution,
            enabled: self.enabled,
            min_limit: self.min_limit,
            max_limit: self.max_limit,
            max_pwm: self.max_pwm(),
            current_output: self.current_output,
        }
    }
}

pub fn max_pwm_for(resolution: u8) -> u16 {
    ((1u32 << resolution) - 1) as u16
}
