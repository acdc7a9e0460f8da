use crate::config::FanConfig;

const ADC_FULL_SCALE: f32 = 4095.0;

#[derive(Debug, Clone)]
pub struct FanCurve {
    min_pwm: u16,
    max_pwm: u16,
    min_temp_c: f32,
    max_temp_c: f32,
    hysteresis_c: f32,
    last_temp_c: Option<f32>,
    current_pwm: u16,
}

impl FanCurve {
    pub fn new(config: &FanConfig) -> Self {
        Self {
            min_pwm: config.min_pwm,
            max_pwm: config.max_pwm,
            min_temp_c: config.min_temp_c,
            max_temp_c: config.max_temp_c,
            hysteresis_c: config.hysteresis_c,
            last_temp_c: None,
            current_pwm: config.min_pwm,
        }
    }

    pub fn current_pwm(&self) -> u16 {
        self.current_pwm
    }

    pub fn update(&mut self, temp_c: f32) -> Option<u16> {
        let target = self.target_for(temp_c);
        if temp_c.is_finite() {
            self.last_temp_c = Some(temp_c);
        }
        if target == self.current_pwm {
            return None;
        }
        self.current_pwm = target;
        Some(target)
    }

    // Hysteresis only holds a fan that is already running.
    pub fn target_for(&self, temp_c: f32) -> u16 {
        if !temp_c.is_finite() {
            return self.max_pwm;
        }

        let falling = self.last_temp_c.is_some_and(|last| temp_c < last);
        let lower = if falling && self.current_pwm > self.min_pwm {
            self.min_temp_c - self.hysteresis_c
        } else {
            self.min_temp_c
        };

        if temp_c >= self.max_temp_c {
            self.max_pwm
        } else if temp_c <= lower {
            self.min_pwm
        } else {
            let fraction = (temp_c - lower) / (self.max_temp_c - lower);
            let span = f32::from(self.max_pwm - self.min_pwm);
            let pwm = f32::from(self.min_pwm) + span * fraction;
            (pwm.round() as u16).clamp(self.min_pwm, self.max_pwm)
        }
    }
}

pub fn feedback_voltage(samples: &[u16], config: &FanConfig) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let sum: f32 = samples.iter().map(|&sample| f32::from(sample)).sum();
    let average = sum / samples.len() as f32;
    let divider = (config.feedback_r1_ohm + config.feedback_r2_ohm) / config.feedback_r2_ohm;
    Some(config.adc_reference_v * average / ADC_FULL_SCALE * divider + config.feedback_offset_v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> FanCurve {
        FanCurve::new(&FanConfig::default())
    }

    #[test]
    fn curve_is_linear_between_thresholds() {
        let curve = curve();
        assert_eq!(curve.target_for(25.0), 0);
        assert_eq!(curve.target_for(30.0), 0);
        assert_eq!(curve.target_for(35.0), 512);
        assert_eq!(curve.target_for(40.0), 1023);
        assert_eq!(curve.target_for(55.0), 1023);
    }

    #[test]
    fn cooling_fan_keeps_running_inside_hysteresis_band() {
        let mut curve = curve();
        assert_eq!(curve.update(35.0), Some(512));

        let cooling = curve.update(29.5).unwrap();
        assert!(cooling > 0, "fan stopped at {cooling}");

        assert_eq!(curve.update(27.9), Some(0));
    }

    #[test]
    fn warming_from_cold_uses_plain_threshold() {
        let mut curve = curve();
        assert_eq!(curve.update(28.0), None);
        assert_eq!(curve.update(29.5), None);
        assert_eq!(curve.current_pwm(), 0);
    }

    #[test]
    fn unreadable_sensor_runs_fan_flat_out() {
        let mut curve = curve();
        assert_eq!(curve.update(f32::NAN), Some(1023));
    }

    #[test]
    fn feedback_voltage_scales_through_divider() {
        let config = FanConfig::default();
        assert_eq!(feedback_voltage(&[], &config), None);

        let zero = feedback_voltage(&[0; 10], &config).unwrap();
        assert!((zero - 0.31).abs() < 1e-4);

        let full = feedback_voltage(&[4095, 4095], &config).unwrap();
        let expected = 3.29 * (6_800.0 + 4_700.0) / 4_700.0 + 0.31;
        assert!((full - expected).abs() < 1e-3, "got {full}");
    }
}
