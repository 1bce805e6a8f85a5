//! Motor, board and control-loop configuration.
//!
//! `MotorConfig` holds the user-level constants (board scaling, motor
//! electrical data, gains, startup behaviour). `DerivedConfig` is computed
//! from it once at startup and carries everything the loops consume per
//! tick, so no derivation happens inside the interrupt path.

use core::f32::consts::TAU;

/// Normalized voltage-vector magnitude limit. The D/Q current controllers
/// produce duty-normalized outputs; their combined magnitude is kept inside
/// this circle.
pub const MAX_NORM: f32 = 0.99;

/// Reference generation strategy for closed-loop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlStrategy {
    /// Velocity PI generates the Q-axis current reference.
    Speed,
    /// Q-axis current reference is commanded directly.
    Torque,
}

/// Quadrature counter wrap-detection parameters.
///
/// The thresholds sit well inside the counter range so a small noise-induced
/// reversal near a boundary cannot be mistaken for a wrap. They must stay
/// farther from the boundaries than the largest per-tick count delta at the
/// motor's maximum mechanical speed.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    /// Free-running hardware counter modulus.
    pub counter_modulus: u32,
    /// Counts above this are "near the top" for wrap detection.
    pub upper_threshold: u16,
    /// Counts below this are "near the bottom" for wrap detection.
    pub lower_threshold: u16,
}

impl EncoderConfig {
    /// 16-bit counter with thresholds at 3/4 and 1/4 of the range.
    pub const fn default_16bit() -> Self {
        Self {
            counter_modulus: 65536,
            upper_threshold: 49151,
            lower_threshold: 16384,
        }
    }
}

/// Per-axis PI coefficients. `kc` is the back-calculation anti-windup gain.
#[derive(Debug, Clone, Copy)]
pub struct PiGains {
    pub kp: f32,
    pub ki: f32,
    pub kc: f32,
    pub out_max: f32,
}

/// User-level configuration, resolved once at startup.
///
/// Defaults describe the MCLV-2 board driving the "Long" Hurst motor
/// (DMA0204024B101) with a 1000-line quadrature encoder.
#[derive(Debug, Clone, Copy)]
pub struct MotorConfig {
    // --- board ---
    /// PWM (and fast-loop) frequency in Hz.
    pub pwm_frequency_hz: f32,
    /// Full-scale duty count handed to the PWM peripheral.
    pub pwm_period_count: u16,
    /// Amps per ADC count after offset removal.
    pub adc_current_scale: f32,
    /// Calibrated zero-current ADC offsets for the two shunt channels.
    pub adc_offset_a: u16,
    pub adc_offset_b: u16,
    /// Volts per ADC count on the DC-bus divider channel.
    pub voltage_adc_scale: f32,

    // --- motor ---
    /// Per-phase stator resistance in ohms.
    pub phase_resistance: f32,
    /// Per-phase stator inductance in henries.
    pub phase_inductance: f32,
    /// Back-EMF constant in Vpeak line-to-line per mechanical kRPM.
    pub back_emf_ll_krpm: f32,
    /// True for star-connected windings (back-EMF divided by sqrt(3)).
    pub star_connected: bool,
    pub pole_pairs: u8,
    /// Rated speed in mechanical RPM; flux weakening activates above the
    /// electrical equivalent of this.
    pub nominal_speed_rpm: f32,
    /// Rated phase current in amps; the (Id, Iq) pair never exceeds this
    /// magnitude.
    pub max_motor_current: f32,
    /// Stator electrical time constant L/R in seconds (sets the Id filter).
    pub electrical_time_constant: f32,

    // --- encoder ---
    /// Encoder pulses per mechanical revolution (after quadrature decode).
    pub encoder_pulses_per_rev: u32,
    pub encoder: EncoderConfig,

    // --- startup ---
    /// Duration of each of the two equal rotor-alignment sub-phases, in
    /// seconds.
    pub align_time_sec: f32,
    /// Q-axis current held at the end of the alignment ramp, in amps.
    pub align_q_current: f32,

    // --- speed reference ---
    /// Closed-loop acceleration bound in mechanical RPM per second.
    pub ramp_rate_rpm_per_sec: f32,
    /// Fast-loop ticks per slow-loop invocation.
    pub slow_loop_divider: u32,

    // --- control gains ---
    pub d_gains: PiGains,
    pub q_gains: PiGains,
    pub speed_gains: PiGains,

    // --- operating mode ---
    pub strategy: ControlStrategy,
    /// Iq clamp when running in torque mode, in amps.
    pub torque_mode_max_current: f32,
    pub flux_weakening: bool,
    /// Most negative Id the flux-weakening allocator may request, in amps.
    pub max_fw_negative_id: f32,

    // --- UI ---
    /// Background-poll invocations a switch stays ignored after an accepted
    /// press (debounce interval / poll period).
    pub switch_debounce_polls: u32,
    /// Fast-loop ticks per background button poll.
    pub button_poll_divider: u32,
}

impl MotorConfig {
    pub const fn default_mclv2_hurst() -> Self {
        Self {
            pwm_frequency_hz: 20_000.0,
            pwm_period_count: 3000,
            // 4.4 A board full scale over a 2048-count half range
            adc_current_scale: 4.4 / 2048.0,
            adc_offset_a: 2048,
            adc_offset_b: 2048,
            // 12-bit ADC, 3.3 V, 30k/2k divider
            voltage_adc_scale: 3.3 / (4095.0 * (2.0 / 32.0)),
            phase_resistance: 0.285,
            phase_inductance: 0.00032,
            back_emf_ll_krpm: 7.24,
            star_connected: true,
            pole_pairs: 5,
            nominal_speed_rpm: 2804.0,
            max_motor_current: 4.4,
            electrical_time_constant: 0.001123,
            encoder_pulses_per_rev: 1000,
            encoder: EncoderConfig::default_16bit(),
            align_time_sec: 2.0,
            align_q_current: 0.4,
            ramp_rate_rpm_per_sec: 200.0,
            slow_loop_divider: 100,
            d_gains: PiGains {
                kp: 0.02,
                ki: 0.0005,
                kc: 0.5,
                out_max: 0.999,
            },
            q_gains: PiGains {
                kp: 0.02,
                ki: 0.0005,
                kc: 0.5,
                out_max: 0.999,
            },
            speed_gains: PiGains {
                kp: 0.005,
                ki: 0.0000002,
                kc: 0.5,
                out_max: 4.4,
            },
            strategy: ControlStrategy::Speed,
            torque_mode_max_current: 0.4,
            flux_weakening: false,
            max_fw_negative_id: -3.0,
            // 500 ms debounce at a 10 ms poll period
            switch_debounce_polls: 50,
            // 10 ms poll period at 20 kHz
            button_poll_divider: 200,
        }
    }

    /// Resolve the per-tick quantities the control loops consume.
    pub fn derive(&self) -> DerivedConfig {
        let fast_loop_period = 1.0 / self.pwm_frequency_hz;
        let slow_loop_period = fast_loop_period * self.slow_loop_divider as f32;
        let pole_pairs = self.pole_pairs as f32;

        let pulses_per_erev = (self.encoder_pulses_per_rev / self.pole_pairs as u32) as u16;
        let overflow_correction =
            (self.encoder.counter_modulus % pulses_per_erev as u32) as u16;
        let underflow_correction = pulses_per_erev - overflow_correction;

        // Current reference ramps over the first half of the first
        // sub-phase, reaching align_q_current there and holding it for the
        // rest of ALIGN.
        let align_ticks = (self.align_time_sec * self.pwm_frequency_hz) as u32;
        let align_current_step = 2.0 * self.align_q_current / align_ticks as f32;

        let ramp_rate_elec = self.ramp_rate_rpm_per_sec / 60.0 * TAU * pole_pairs;
        let ramp_delta = ramp_rate_elec * slow_loop_period;

        let ke_phase_krpm = if self.star_connected {
            self.back_emf_ll_krpm / 1.732_050_8
        } else {
            self.back_emf_ll_krpm
        };
        // Vpeak(phase)/kRPM(mech) -> Vpeak(phase)/(rad/s electrical)
        let back_emf_per_rad_elec = ke_phase_krpm / 1000.0 * 60.0 / TAU / pole_pairs;

        DerivedConfig {
            fast_loop_period,
            slow_loop_period,
            pulses_per_erev,
            overflow_correction,
            underflow_correction,
            align_ticks,
            align_current_step,
            ramp_delta,
            speed_hysteresis: 5.0 * ramp_delta,
            nominal_speed_elec: self.nominal_speed_rpm / 60.0 * TAU * pole_pairs,
            max_current_squared: self.max_motor_current * self.max_motor_current,
            id_filter_gain: fast_loop_period / (fast_loop_period + self.electrical_time_constant),
            back_emf_per_rad_elec,
            neutral_duty: self.pwm_period_count / 2,
            max_norm_squared: MAX_NORM * MAX_NORM,
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::default_mclv2_hurst()
    }
}

/// Quantities precomputed from [`MotorConfig`], consumed by the loops.
#[derive(Debug, Clone, Copy)]
pub struct DerivedConfig {
    pub fast_loop_period: f32,
    pub slow_loop_period: f32,
    /// Encoder pulses spanning one electrical revolution.
    pub pulses_per_erev: u16,
    /// Compensation added on a forward counter wrap.
    pub overflow_correction: u16,
    /// Compensation added on a backward counter wrap.
    pub underflow_correction: u16,
    /// Fast-loop ticks per alignment sub-phase.
    pub align_ticks: u32,
    /// Per-tick Iq increment during the alignment ramp.
    pub align_current_step: f32,
    /// Per-slow-tick velocity reference increment, electrical rad/s.
    pub ramp_delta: f32,
    /// Snap band around the velocity input, electrical rad/s.
    pub speed_hysteresis: f32,
    /// Rated speed in electrical rad/s; flux-weakening threshold.
    pub nominal_speed_elec: f32,
    pub max_current_squared: f32,
    /// Single-pole filter gain for the flux-weakening Id reference.
    pub id_filter_gain: f32,
    /// Back-EMF in Vpeak per electrical rad/s.
    pub back_emf_per_rad_elec: f32,
    /// Duty producing the null voltage vector.
    pub neutral_duty: u16,
    pub max_norm_squared: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_encoder_constants() {
        let cfg = MotorConfig::default_mclv2_hurst();
        let d = cfg.derive();
        // 1000 pulses / 5 pole pairs
        assert_eq!(d.pulses_per_erev, 200);
        // 65536 % 200 = 136, paired corrections sum to one electrical rev
        assert_eq!(d.overflow_correction, 136);
        assert_eq!(d.underflow_correction, 64);
        assert_eq!(d.overflow_correction + d.underflow_correction, 200);
    }

    #[test]
    fn derived_loop_timing() {
        let cfg = MotorConfig::default_mclv2_hurst();
        let d = cfg.derive();
        assert!((d.fast_loop_period - 50e-6).abs() < 1e-9);
        assert!((d.slow_loop_period - 5e-3).abs() < 1e-7);
        // 2 s per alignment sub-phase at 20 kHz
        assert_eq!(d.align_ticks, 40_000);
    }

    #[test]
    fn nominal_speed_is_electrical() {
        let d = MotorConfig::default_mclv2_hurst().derive();
        // 2804 RPM mech * 5 pole pairs ~= 1468 rad/s elec
        assert!((d.nominal_speed_elec - 1468.0).abs() < 1.0);
    }
}
