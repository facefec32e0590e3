use skyfsm_core::mission::PidGains;

/// Single-axis PID controller.
///
/// The accumulator lives in the controller and therefore in the action that
/// owns it; a new state visit starts from zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Pid {
    gains: PidGains,
    integral: f64,
    prev_error: Option<f64>,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: None,
        }
    }

    /// Control output for `error` after `dt` seconds.
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        if dt <= 0.0 {
            return self.gains.kp * error;
        }
        self.integral += error * dt;
        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / dt,
            None => 0.0,
        };
        self.prev_error = Some(error);
        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_only() {
        let mut pid = Pid::new(PidGains {
            kp: 2.0,
            ki: 0.0,
            kd: 0.0,
        });
        assert_eq!(pid.update(0.5, 0.1), 1.0);
        assert_eq!(pid.update(-0.25, 0.1), -0.5);
    }

    #[test]
    fn integral_accumulates_and_resets() {
        let mut pid = Pid::new(PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        });
        pid.update(1.0, 0.5);
        pid.update(1.0, 0.5);
        assert!((pid.integral() - 1.0).abs() < 1e-9);

        pid.reset();
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn derivative_uses_previous_error() {
        let mut pid = Pid::new(PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
        });
        assert_eq!(pid.update(0.0, 0.1), 0.0);
        let out = pid.update(0.2, 0.1);
        assert!((out - 2.0).abs() < 1e-9);
    }
}
