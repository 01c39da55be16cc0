// Velocity-form (incremental) PID controller

/// Default divisor of the derivative low-pass filter
pub const DEFAULT_FILTER_DIVISOR: f32 = 8.0;

/// PID gains
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGain {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
}

/// PID gains and output limits
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidParam {
    pub gain: PidGain,
    /// Minimum output limit
    pub min: f32,
    /// Maximum output limit
    pub max: f32,
}

impl PidParam {
    /// Parameters with a symmetric output range (±limit)
    pub const fn symmetric(gain: PidGain, limit: f32) -> Self {
        Self {
            gain,
            min: -limit,
            max: limit,
        }
    }
}

/// Velocity-form PID controller
///
/// Each call computes an output increment from the change in error and adds
/// it to an accumulated output. The accumulated output itself is clamped to
/// `[min, max]`, which doubles as anti-windup.
#[derive(Debug, Clone)]
pub struct VelocityPid {
    param: PidParam,
    /// Divisor of the derivative EMA (1/N smoothing)
    filter_divisor: f32,
    /// Error of the previous sample
    pre_error: f32,
    /// Proportional rate of the previous sample (None until the first sample)
    pre_prop: Option<f32>,
    /// Low-pass filtered derivative
    lpf_deriv: f32,
    /// Accumulated, clamped output
    output: f32,
}

impl VelocityPid {
    /// Create a new controller
    ///
    /// # Arguments
    /// * `param` - Gains and output limits
    pub fn new(param: PidParam) -> Self {
        Self {
            param,
            filter_divisor: DEFAULT_FILTER_DIVISOR,
            pre_error: 0.0,
            pre_prop: None,
            lpf_deriv: 0.0,
            output: 0.0,
        }
    }

    /// Replace the derivative filter divisor
    ///
    /// # Panics
    /// If `divisor < 1.0` (the filter would overshoot)
    pub fn with_filter_divisor(mut self, divisor: f32) -> Self {
        assert!(divisor >= 1.0, "derivative filter divisor must be >= 1");
        self.filter_divisor = divisor;
        self
    }

    /// Update the controller from a target and a measurement
    ///
    /// Same as `calc(target - actual, dt)`.
    pub fn calc_target(&mut self, target: f32, actual: f32, dt: f32) -> f32 {
        self.calc(target - actual, dt)
    }

    /// Update the controller
    ///
    /// # Arguments
    /// * `error` - Setpoint minus measurement
    /// * `dt` - Time since the previous call [s]
    ///
    /// # Returns
    /// Accumulated output, within `[min, max]`
    ///
    /// # Panics
    /// If `dt` is not strictly positive
    pub fn calc(&mut self, error: f32, dt: f32) -> f32 {
        assert!(dt > 0.0, "PID time step must be positive");

        let prop = (error - self.pre_error) / dt;
        let deriv = match self.pre_prop {
            Some(pre_prop) => (prop - pre_prop) / dt,
            None => 0.0,
        };
        self.pre_error = error;
        self.pre_prop = Some(prop);

        self.lpf_deriv += (deriv - self.lpf_deriv) / self.filter_divisor;

        let gain = &self.param.gain;
        let du = gain.kp * prop + gain.ki * error + gain.kd * self.lpf_deriv;

        self.output = clamp(self.output + du, self.param.min, self.param.max);
        self.output
    }

    /// Clear all controller state
    pub fn reset(&mut self) {
        self.pre_error = 0.0;
        self.pre_prop = None;
        self.lpf_deriv = 0.0;
        self.output = 0.0;
    }

    /// Set gains and limits, then reset
    pub fn set_param(&mut self, param: PidParam) {
        self.param = param;
        self.reset();
    }

    /// Set the gains, then reset
    pub fn set_gain(&mut self, gain: PidGain) {
        self.param.gain = gain;
        self.reset();
    }

    /// Set the output limits
    ///
    /// Does not reset; only later outputs see the new bounds.
    pub fn set_limit(&mut self, min: f32, max: f32) {
        self.param.min = min;
        self.param.max = max;
    }

    /// Get the current parameters
    pub fn param(&self) -> &PidParam {
        &self.param
    }

    /// Get the last output
    pub fn output(&self) -> f32 {
        self.output
    }

    /// Get the error of the last sample
    pub fn previous_error(&self) -> f32 {
        self.pre_error
    }

    /// Get the filtered derivative
    pub fn filtered_derivative(&self) -> f32 {
        self.lpf_deriv
    }

    /// True once a sample has been taken since the last reset
    pub fn is_warm(&self) -> bool {
        self.pre_prop.is_some()
    }
}

/// `f32::clamp` without its `min <= max` panic
fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value > max {
        max
    } else if value < min {
        min
    } else {
        value
    }
}
