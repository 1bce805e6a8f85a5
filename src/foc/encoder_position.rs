// Quadrature-encoder rotor position and speed estimation
//
// The hardware counter free-runs modulo its own range while the electrical
// angle repeats every pulses_per_erev counts; the two moduli are generally
// not commensurate, so every counter wrap shifts the electrical position by
// a fixed correction that is accumulated here. The same offset register
// anchors the estimator: a reset seeds it so the count captured with the
// rotor locked maps to electrical position zero, whatever value the
// free-running counter happened to hold.

use core::f32::consts::TAU;

use crate::config::{DerivedConfig, EncoderConfig};

/// Electrical position and speed derived from raw quadrature counts
pub struct EncoderPosition {
    /// Counts per electrical revolution
    pulses_per_erev: u16,
    /// Correction accumulated on a forward counter wrap
    overflow_correction: u16,
    /// Correction accumulated on a backward counter wrap
    underflow_correction: u16,
    upper_threshold: u16,
    lower_threshold: u16,
    /// Radians per encoder count
    angle_per_count: f32,
    /// Slow-loop period used for the finite-difference speed estimate
    slow_loop_period: f32,

    /// Previous raw counter value (wrap detection)
    previous_raw_count: u16,
    /// Offset added to the raw count before the electrical-position modulo,
    /// always within [0, pulses_per_erev). Seeded at reset so the anchor
    /// count maps to position zero, then advanced by the wrap corrections.
    phase_offset: u16,
    /// Position within one electrical revolution, [0, pulses_per_erev)
    electrical_position: u16,
    /// Raw count captured at the previous speed update
    previous_speed_count: i16,
    /// Electrical angular speed in rad/s
    speed_elec: f32,
}

impl EncoderPosition {
    pub fn new(encoder: EncoderConfig, derived: &DerivedConfig) -> Self {
        Self {
            pulses_per_erev: derived.pulses_per_erev,
            overflow_correction: derived.overflow_correction,
            underflow_correction: derived.underflow_correction,
            upper_threshold: encoder.upper_threshold,
            lower_threshold: encoder.lower_threshold,
            angle_per_count: TAU / derived.pulses_per_erev as f32,
            slow_loop_period: derived.slow_loop_period,
            previous_raw_count: 0,
            phase_offset: 0,
            electrical_position: 0,
            previous_speed_count: 0,
            speed_elec: 0.0,
        }
    }

    /// Fast-loop position update
    ///
    /// Detects counter wraps by comparing the previous and current samples
    /// against the threshold bands, folds the wrap correction into the
    /// phase offset, and maps the offset count into one electrical
    /// revolution.
    ///
    /// # Arguments
    /// * `raw_count` - Free-running hardware counter value
    ///
    /// # Returns
    /// Electrical angle in radians, [0, 2π)
    pub fn update(&mut self, raw_count: u16) -> f32 {
        if raw_count > self.upper_threshold && self.previous_raw_count < self.lower_threshold {
            // Counter ran backward through zero
            self.phase_offset = self.phase_offset.wrapping_add(self.underflow_correction);
        } else if self.previous_raw_count > self.upper_threshold
            && raw_count < self.lower_threshold
        {
            // Counter ran forward past its top
            self.phase_offset = self.phase_offset.wrapping_add(self.overflow_correction);
        }
        self.phase_offset %= self.pulses_per_erev;

        let compensated = raw_count as u32 + self.phase_offset as u32;
        self.electrical_position = (compensated % self.pulses_per_erev as u32) as u16;
        self.previous_raw_count = raw_count;

        // electrical_position < pulses_per_erev keeps the product below 2π,
        // but guard the boundary with a single add/subtract rather than a
        // full modulo; the per-tick delta is bounded.
        let mut angle = self.electrical_position as f32 * self.angle_per_count;
        if angle >= TAU {
            angle -= TAU;
        } else if angle < 0.0 {
            angle += TAU;
        }
        angle
    }

    /// Slow-loop speed update
    ///
    /// Finite difference of raw counts over the slow-loop period. The i16
    /// subtraction absorbs a full-range counter wrap between samples, and
    /// the slower cadence keeps quantization noise out of the estimate.
    pub fn update_speed(&mut self, raw_count: u16) {
        let current = raw_count as i16;
        let count_diff = current.wrapping_sub(self.previous_speed_count);
        self.speed_elec = count_diff as f32 * TAU
            / (self.pulses_per_erev as f32 * self.slow_loop_period);
        self.previous_speed_count = current;
    }

    /// Latest electrical angular speed in rad/s
    pub fn speed(&self) -> f32 {
        self.speed_elec
    }

    /// Position within the current electrical revolution, in counts
    pub fn electrical_position(&self) -> u16 {
        self.electrical_position
    }

    pub fn phase_offset(&self) -> u16 {
        self.phase_offset
    }

    pub fn previous_raw_count(&self) -> u16 {
        self.previous_raw_count
    }

    /// Re-anchor the estimator at the current counter value
    ///
    /// The counter free-runs, so the count captured here is arbitrary; the
    /// phase offset is seeded so this exact count maps to electrical
    /// position zero, the same anchoring a hardware counter restart would
    /// give. Both previous-count registers are seeded and the speed
    /// estimate is cleared, so nothing from before the reset can leak into
    /// the next speed or position calculation. Called at the
    /// ALIGN → CLOSED_LOOP transition with the rotor locked at a known
    /// position.
    pub fn reset(&mut self, raw_count: u16) {
        let anchor_phase = raw_count % self.pulses_per_erev;
        self.phase_offset = (self.pulses_per_erev - anchor_phase) % self.pulses_per_erev;
        self.electrical_position = 0;
        self.previous_raw_count = raw_count;
        self.previous_speed_count = raw_count as i16;
        self.speed_elec = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;

    fn make_estimator() -> EncoderPosition {
        let cfg = MotorConfig::default_mclv2_hurst();
        EncoderPosition::new(cfg.encoder, &cfg.derive())
    }

    #[test]
    fn test_position_tracks_counts() {
        let mut est = make_estimator();
        // 200 counts per electrical revolution -> 50 counts = π/2
        let angle = est.update(50);
        assert!((angle - core::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert_eq!(est.electrical_position(), 50);
        // One full electrical revolution later the position repeats
        let angle = est.update(250);
        assert!((angle - core::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_forward_counter_wrap_compensation() {
        let mut est = make_estimator();
        est.reset(65500);

        // Walk forward through the 65535 -> 0 boundary
        let mut prev_position = est.update(65500);
        assert_eq!(est.electrical_position(), 0);
        let before_wrap = est.phase_offset();
        for raw in [65520u16, 65535, 14, 34, 54] {
            let angle = est.update(raw);
            // Angle keeps advancing smoothly, no discontinuity at the wrap
            let mut delta = angle - prev_position;
            if delta < 0.0 {
                delta += TAU;
            }
            assert!(delta > 0.0 && delta < 0.7, "delta {delta} at raw {raw}");
            prev_position = angle;
        }
        // Exactly one wrap was compensated: the counter modulus sits
        // 65536 % 200 = 136 counts into an electrical revolution, so a
        // forward wrap advances the offset by exactly that phase shift.
        assert_eq!(est.phase_offset(), (before_wrap + 136) % 200);

        // No further wrap events while counting on
        est.update(500);
        assert_eq!(est.phase_offset(), (before_wrap + 136) % 200);
    }

    #[test]
    fn test_backward_counter_wrap_compensation() {
        let mut est = make_estimator();
        est.reset(40);
        est.update(40);
        let before_wrap = est.phase_offset();
        est.update(10);
        // Backward through zero: 10 -> 65520
        est.update(65520);
        assert_eq!(est.phase_offset(), (before_wrap + 64) % 200);
    }

    #[test]
    fn test_small_reversal_near_threshold_is_not_a_wrap() {
        let mut est = make_estimator();
        est.reset(20000);
        est.update(20000);
        let before = est.phase_offset();
        // A noise-induced reversal between the bands must not register
        est.update(19990);
        est.update(20010);
        assert_eq!(est.phase_offset(), before);
    }

    #[test]
    fn test_reset_anchors_position_to_counter_value() {
        // A rotor locked at the same physical position must read the same
        // electrical angle no matter where the free-running counter sits
        // at the reset instant.
        let mut a = make_estimator();
        a.reset(123);
        let angle_a = a.update(123);
        let mut b = make_estimator();
        b.reset(60000);
        let angle_b = b.update(60000);
        assert_eq!(a.electrical_position(), 0);
        assert_eq!(b.electrical_position(), 0);
        assert!((angle_a - angle_b).abs() < 1e-6);
    }

    #[test]
    fn test_speed_finite_difference() {
        let mut est = make_estimator();
        est.reset(1000);
        // 100 counts over one slow-loop period (5 ms) with 200 counts/erev:
        // half an electrical revolution -> π / 0.005 rad/s
        est.update_speed(1100);
        let expected = core::f32::consts::PI / 0.005;
        assert!((est.speed() - expected).abs() < 1.0);
    }

    #[test]
    fn test_speed_absorbs_counter_wrap() {
        let mut est = make_estimator();
        est.reset(65500);
        est.update_speed(64); // +100 counts across the wrap
        let expected = core::f32::consts::PI / 0.005;
        assert!((est.speed() - expected).abs() < 1.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut est = make_estimator();
        est.update(65000);
        est.update(100); // forces a wrap event
        est.update_speed(100);
        est.reset(100);
        assert_eq!(est.previous_raw_count(), 100);
        assert_eq!(est.speed(), 0.0);
        // Re-anchored: the reset count maps to position zero again
        est.update(100);
        assert_eq!(est.electrical_position(), 0);
    }
}
