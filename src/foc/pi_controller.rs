// PI (Proportional-Integral) controller with back-calculation anti-windup

use libm::sqrtf;

/// PI controller with anti-windup and output limiting
///
/// One instance per controlled axis (D current, Q current, speed). The
/// integral sum persists across ticks; the anti-windup gain `kc` bleeds the
/// excess back out of the integrator whenever the output saturates, so the
/// sum stays bounded during sustained saturation.
pub struct PiController {
    /// Proportional gain
    kp: f32,
    /// Integral gain (pre-scaled by the loop period)
    ki: f32,
    /// Back-calculation anti-windup gain
    kc: f32,
    /// Integral accumulator
    integral: f32,
    /// Minimum output limit
    out_min: f32,
    /// Maximum output limit
    out_max: f32,
    /// Last calculated output, always within [out_min, out_max]
    last_output: f32,
}

impl PiController {
    /// Create a new PI controller
    ///
    /// # Arguments
    /// * `kp` - Proportional gain
    /// * `ki` - Integral gain
    /// * `kc` - Anti-windup gain
    /// * `out_min` - Minimum output limit
    /// * `out_max` - Maximum output limit
    pub fn new(kp: f32, ki: f32, kc: f32, out_min: f32, out_max: f32) -> Self {
        Self {
            kp,
            ki,
            kc,
            integral: 0.0,
            out_min,
            out_max,
            last_output: 0.0,
        }
    }

    /// Create a symmetric PI controller (output range: -limit to +limit)
    pub fn new_symmetric(kp: f32, ki: f32, kc: f32, output_limit: f32) -> Self {
        Self::new(kp, ki, kc, -output_limit, output_limit)
    }

    /// Execute one controller step
    ///
    /// Integrates first, then back-calculates: if the unclamped output
    /// exceeds a bound, `kc * (clamped - unclamped)` is folded back into the
    /// integrator before the next tick.
    ///
    /// # Arguments
    /// * `reference` - Desired value
    /// * `measurement` - Actual measured value
    ///
    /// # Returns
    /// Controller output, limited to [out_min, out_max]
    pub fn update(&mut self, reference: f32, measurement: f32) -> f32 {
        let error = reference - measurement;

        self.integral += self.ki * error;
        let unclamped = self.kp * error + self.integral;
        let output = unclamped.clamp(self.out_min, self.out_max);

        if output != unclamped {
            self.integral += self.kc * (output - unclamped);
        }

        self.last_output = output;
        output
    }

    /// Reset the integral term and output to zero
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_output = 0.0;
    }

    /// Seed the integral sum, e.g. for bumpless transfer when the loop is
    /// handed a reference mid-flight.
    pub fn preload(&mut self, integral: f32) {
        self.integral = integral;
    }

    /// Set the output limits
    pub fn set_limits(&mut self, out_min: f32, out_max: f32) {
        self.out_min = out_min;
        self.out_max = out_max;
    }

    /// Set symmetric output limits (±limit)
    pub fn set_symmetric_limit(&mut self, output_limit: f32) {
        self.out_min = -output_limit;
        self.out_max = output_limit;
    }

    /// Get the current output
    pub fn output(&self) -> f32 {
        self.last_output
    }

    /// Get the current integral sum
    pub fn integral(&self) -> f32 {
        self.integral
    }
}

/// D-priority voltage-circle limit for the Q-axis controller
///
/// Given the D-axis output, returns the largest Q magnitude keeping the
/// combined vector inside the circle of squared radius `max_norm_squared`:
/// q_max = sqrt(max_norm² - d²). The operand is clamped at zero so a D
/// output at (or marginally past) the limit can never produce a domain
/// error.
#[inline]
pub fn voltage_circle_q_limit(d_output: f32, max_norm_squared: f32) -> f32 {
    let d_squared = (d_output * d_output).min(max_norm_squared);
    sqrtf(max_norm_squared - d_squared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let mut pi = PiController::new(1.0, 0.0, 0.0, -10.0, 10.0);
        let output = pi.update(5.0, 0.0);
        assert_eq!(output, 5.0); // P term only
    }

    #[test]
    fn test_output_limiting() {
        let mut pi = PiController::new(1.0, 0.0, 0.0, -10.0, 10.0);
        let output = pi.update(20.0, 0.0);
        assert_eq!(output, 10.0); // Limited to max
    }

    #[test]
    fn test_integral_accumulation() {
        let mut pi = PiController::new(0.0, 1.0, 0.0, -100.0, 100.0);
        pi.update(10.0, 0.0);
        assert_eq!(pi.integral(), 10.0);
        pi.update(10.0, 0.0);
        assert_eq!(pi.integral(), 20.0);
    }

    #[test]
    fn test_anti_windup_bounds_integral() {
        let mut pi = PiController::new(0.0, 1.0, 0.5, -1.0, 1.0);
        let mut max_integral = 0.0f32;
        for _ in 0..10_000 {
            let output = pi.update(10.0, 0.0);
            assert_eq!(output, 1.0); // pinned at the limit
            max_integral = max_integral.max(pi.integral().abs());
        }
        // Back-calculation holds the sum at its fixed point instead of
        // letting it diverge: sum -> sum + ki*err + kc*(1 - sum - ki*err)
        assert!(max_integral < 12.0);
        assert!((pi.integral() - 11.0).abs() < 1e-3);
    }

    #[test]
    fn test_anti_windup_recovers_after_saturation() {
        let mut pi = PiController::new(0.0, 1.0, 0.5, -1.0, 1.0);
        for _ in 0..100 {
            pi.update(10.0, 0.0);
        }
        // Error reverses: output must leave the rail within a few ticks
        // rather than coast on a wound-up integrator.
        let mut output = 1.0;
        for _ in 0..10 {
            output = pi.update(0.0, 1.0);
        }
        assert!(output < 1.0);
    }

    #[test]
    fn test_voltage_circle_limit() {
        let max_norm_sq = 0.9801; // 0.99^2
        let mut d = -0.99f32;
        while d <= 0.99 {
            let q_max = voltage_circle_q_limit(d, max_norm_sq);
            assert!(q_max >= 0.0);
            assert!(q_max * q_max + d * d <= max_norm_sq + 1e-5);
            d += 0.01;
        }
        // At the rail the Q budget collapses to ~0
        assert!(voltage_circle_q_limit(0.99, max_norm_sq) < 1e-3);
        // Past the rail the operand clamps instead of going negative
        assert_eq!(voltage_circle_q_limit(1.5, max_norm_sq), 0.0);
    }

    #[test]
    fn test_preload_sets_integral() {
        let mut pi = PiController::new(0.0, 0.0, 0.0, -10.0, 10.0);
        pi.preload(2.5);
        assert_eq!(pi.update(0.0, 0.0), 2.5);
    }
}
