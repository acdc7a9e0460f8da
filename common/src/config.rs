use serde::{Deserialize, Serialize};

use crate::channel::SUPPORTED_RESOLUTIONS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    // Seconds past each minute boundary.
    pub tick_offset_secs: u32,
    pub override_poll_interval_ms: u64,
    pub override_max_polls: u32,
    pub autostart: bool,
    pub max_points: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_offset_secs: 1,
            override_poll_interval_ms: 100,
            override_max_polls: 300,
            autostart: true,
            max_points: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn override_duration_ms(&self) -> u64 {
        self.override_poll_interval_ms * u64::from(self.override_max_polls)
    }

    pub fn sanitize(&mut self) {
        self.tick_offset_secs = self.tick_offset_secs.min(30);
        self.override_poll_interval_ms = self.override_poll_interval_ms.clamp(10, 5_000);
        self.override_max_polls = self.override_max_polls.clamp(1, 36_000);
        self.max_points = self.max_points.clamp(1, 255);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHardwareConfig {
    pub pin: u8,
    pub resolution: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanConfig {
    pub pwm_channel: u8,
    pub resolution: u8,
    pub min_pwm: u16,
    pub max_pwm: u16,
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    pub hysteresis_c: f32,
    pub sample_count: u8,
    pub feedback_r1_ohm: f32,
    pub feedback_r2_ohm: f32,
    pub feedback_offset_v: f32,
    pub adc_reference_v: f32,
    pub poll_interval_ms: u64,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            pwm_channel: 11,
            resolution: 10,
            min_pwm: 0,
            max_pwm: 1023,
            min_temp_c: 30.0,
            max_temp_c: 40.0,
            hysteresis_c: 2.0,
            sample_count: 10,
            feedback_r1_ohm: 6_800.0,
            feedback_r2_ohm: 4_700.0,
            feedback_offset_v: 0.31,
            adc_reference_v: 3.29,
            poll_interval_ms: 1_000,
        }
    }
}

impl FanConfig {
    pub fn sanitize(&mut self) {
        if !SUPPORTED_RESOLUTIONS.contains(&self.resolution) {
            self.resolution = 10;
        }
        let ceiling = crate::channel::max_pwm_for(self.resolution);
        self.max_pwm = self.max_pwm.min(ceiling);
        self.min_pwm = self.min_pwm.min(self.max_pwm);

        if !self.min_temp_c.is_finite() || !self.max_temp_c.is_finite() {
            self.min_temp_c = 30.0;
            self.max_temp_c = 40.0;
        }
        if self.max_temp_c <= self.min_temp_c {
            self.max_temp_c = self.min_temp_c + 1.0;
        }
        self.hysteresis_c = if self.hysteresis_c.is_finite() {
            self.hysteresis_c.clamp(0.0, 10.0)
        } else {
            2.0
        };
        self.sample_count = self.sample_count.max(1);
        if self.feedback_r2_ohm <= 0.0 || !self.feedback_r2_ohm.is_finite() {
            self.feedback_r2_ohm = 4_700.0;
        }
        self.poll_interval_ms = self.poll_interval_ms.clamp(100, 60_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub http_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub channels: Vec<ChannelHardwareConfig>,
    pub fan: FanConfig,
    pub timezone: String,
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            channels: default_channels(),
            fan: FanConfig::default(),
            timezone: "Europe/Madrid".to_string(),
            network: NetworkConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.scheduler.sanitize();
        self.fan.sanitize();

        for channel in &mut self.channels {
            if !SUPPORTED_RESOLUTIONS.contains(&channel.resolution) {
                channel.resolution = 10;
            }
        }
        if self.channels.is_empty() {
            self.channels = default_channels();
        }
        if self.network.http_port == 0 {
            self.network.http_port = 8080;
        }
    }
}

fn default_channels() -> Vec<ChannelHardwareConfig> {
    [25, 26, 27]
        .into_iter()
        .map(|pin| ChannelHardwareConfig {
            pin,
            resolution: 10,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_override_window_is_thirty_seconds() {
        assert_eq!(SchedulerConfig::default().override_duration_ms(), 30_000);
    }

    #[test]
    fn sanitize_repairs_bad_values() {
        let mut config = RuntimeConfig {
            channels: vec![ChannelHardwareConfig { pin: 4, resolution: 11 }],
            ..RuntimeConfig::default()
        };
        config.fan.max_temp_c = 10.0;
        config.fan.resolution = 8;
        config.scheduler.override_max_polls = 0;

        config.sanitize();

        assert_eq!(config.channels[0].resolution, 10);
        assert_eq!(config.fan.max_temp_c, 31.0);
        assert_eq!(config.fan.max_pwm, 255);
        assert_eq!(config.scheduler.override_max_polls, 1);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"timezone":"UTC"}"#).unwrap();
        assert_eq!(config.channels.len(), 3);
        assert_eq!(config.fan.pwm_channel, 11);
        assert!(config.scheduler.autostart);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"channels":[{"pin":1,"resolution":8}],"scheduler":{"autostart":false},"fan":{"max_temp_c":45.0}}"#,
        )
        .unwrap();

        assert_eq!(
            config.channels,
            vec![ChannelHardwareConfig { pin: 1, resolution: 8 }]
        );
        assert!(!config.scheduler.autostart);
        assert_eq!(config.scheduler.tick_offset_secs, 1);
        assert_eq!(config.scheduler.override_duration_ms(), 30_000);
        assert_eq!(config.fan.max_temp_c, 45.0);
        assert_eq!(config.fan.min_temp_c, 30.0);
        assert_eq!(config.timezone, "Europe/Madrid");
        assert_eq!(config.network.http_port, 8080);
    }
}
