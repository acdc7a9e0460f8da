use std::sync::{Mutex, PoisonError};

use tracing::debug;

pub trait PwmDriver: Send + Sync {
    fn write(&self, channel: usize, value: u16) -> anyhow::Result<()>;
}

pub struct LoggingPwm;

impl PwmDriver for LoggingPwm {
    fn write(&self, channel: usize, value: u16) -> anyhow::Result<()> {
        debug!(channel, value, "pwm write");
        Ok(())
    }
}

pub trait FanSensors: Send + Sync {
    fn temperature_c(&self) -> Option<f32>;

    fn feedback_samples(&self, count: usize) -> Vec<u16>;
}

pub struct StaticSensors {
    temperature_c: f32,
    feedback_raw: u16,
    adc: Mutex<()>,
}

impl StaticSensors {
    pub fn new(temperature_c: f32, feedback_raw: u16) -> Self {
        Self {
            temperature_c,
            feedback_raw,
            adc: Mutex::new(()),
        }
    }
}

impl FanSensors for StaticSensors {
    fn temperature_c(&self) -> Option<f32> {
        Some(self.temperature_c)
    }

    fn feedback_samples(&self, count: usize) -> Vec<u16> {
        let _adc = self.adc.lock().unwrap_or_else(PoisonError::into_inner);
        vec![self.feedback_raw; count]
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct RecordingPwm {
    writes: Mutex<Vec<(usize, u16)>>,
}

#[cfg(test)]
impl RecordingPwm {
    pub fn writes(&self) -> Vec<(usize, u16)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn outputs(&self, channels: usize) -> Vec<u16> {
        let writes = self.writes.lock().unwrap();
        (0..channels)
            .map(|channel| {
                writes
                    .iter()
                    .rev()
                    .find(|(written, _)| *written == channel)
                    .map(|(_, value)| *value)
                    .unwrap_or(0)
            })
            .collect()
    }
}

#[cfg(test)]
impl PwmDriver for RecordingPwm {
    fn write(&self, channel: usize, value: u16) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push((channel, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_pwm_reports_last_value_per_channel() {
        let pwm = RecordingPwm::default();
        pwm.write(2, 300).unwrap();
        pwm.write(0, 5).unwrap();
        pwm.write(2, 12).unwrap();

        assert_eq!(pwm.outputs(3), vec![5, 0, 12]);
        assert_eq!(pwm.writes().len(), 3);
    }

    #[test]
    fn static_sensors_repeat_readings() {
        let sensors = StaticSensors::new(25.0, 1200);
        assert_eq!(sensors.temperature_c(), Some(25.0));
        assert_eq!(sensors.feedback_samples(3), vec![1200, 1200, 1200]);
    }
}
