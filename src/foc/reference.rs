// Speed and current reference management
//
// The velocity ramp runs on the slow-loop cadence; flux weakening and the
// torque-mode branch run per fast tick because they feed the current
// controllers directly.

use libm::{fabsf, sqrtf};

/// Flux weakening never divides by a velocity reference below this floor
/// (electrical rad/s). The above-nominal precondition already keeps the
/// denominator large for any sane configuration; this guard covers a
/// misconfigured nominal speed near zero.
const FW_SPEED_EPSILON: f32 = 1.0;

/// Velocity and current references, reset to zero for every run session
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceParams {
    /// Commanded velocity magnitude, electrical rad/s
    pub velocity_input: f32,
    /// Rate-limited velocity reference tracking `velocity_input`
    pub velocity_ref: f32,
    /// Commanded Q current magnitude in torque mode, amps
    pub torque_input: f32,
    /// D-axis current reference, amps (negative under flux weakening)
    pub id_ref: f32,
    /// Q-axis current reference, amps
    pub iq_ref: f32,
    /// Magnitude bound for the speed controller output
    pub iq_ref_max: f32,
    /// Unfiltered flux-weakening Id back-solve result
    pub id_ref_fw_raw: f32,
    /// Single-pole-filtered Id reference
    pub id_ref_fw_filtered: f32,
}

impl ReferenceParams {
    pub fn new(max_current: f32) -> Self {
        Self {
            iq_ref_max: max_current,
            ..Default::default()
        }
    }

    /// Zero everything for a fresh run session
    pub fn reset(&mut self, max_current: f32) {
        *self = Self::new(max_current);
    }

    /// Rate-limited velocity reference tracking (slow loop)
    ///
    /// Steps `velocity_ref` toward `velocity_input` by at most `ramp_delta`
    /// per call; inside the hysteresis band the reference snaps to the
    /// input so it cannot chatter around convergence.
    pub fn speed_ramp(&mut self, ramp_delta: f32, hysteresis: f32) {
        let diff = self.velocity_input - self.velocity_ref;
        if diff >= hysteresis {
            self.velocity_ref += ramp_delta;
        } else if diff <= -hysteresis {
            self.velocity_ref -= ramp_delta;
        } else {
            self.velocity_ref = self.velocity_input;
        }
    }
}

/// Motor constants consumed by the flux-weakening allocator
#[derive(Debug, Clone, Copy)]
pub struct FluxWeakeningParams {
    /// Activation threshold, electrical rad/s
    pub nominal_speed_elec: f32,
    pub max_norm_squared: f32,
    /// Per-phase resistance, ohms
    pub resistance: f32,
    /// Per-phase inductance, henries
    pub inductance: f32,
    /// Back-EMF constant, Vpeak per electrical rad/s
    pub back_emf_constant: f32,
    /// Single-pole filter gain matched to the electrical time constant
    pub filter_gain: f32,
    /// Most negative allowed Id reference, amps (negative)
    pub max_negative_id_ref: f32,
    pub max_current: f32,
    pub max_current_squared: f32,
}

/// Flux-weakening current allocation (D-priority)
///
/// Above nominal speed, back-solves the Id that holds the Q-axis voltage
/// inside the voltage circle given the achievable phase voltage, filters
/// it, clamps it to `[max_negative_id_ref, 0]`, and shrinks the Q current
/// budget so the combined current magnitude stays on the rated circle.
/// Below nominal speed all flux-weakening state is forced to zero; no
/// history survives a mode crossing.
///
/// # Arguments
/// * `refs` - Reference set mutated in place
/// * `vd` - Last D-axis voltage command (normalized)
/// * `max_phase_voltage` - Achievable phase voltage, volts (Vbus / sqrt(3))
pub fn flux_weakening(refs: &mut ReferenceParams, vd: f32, max_phase_voltage: f32, p: &FluxWeakeningParams) {
    let omega = refs.velocity_ref;
    if omega > p.nominal_speed_elec && omega > FW_SPEED_EPSILON {
        // Q-axis voltage headroom left by the D output (clamped so the
        // sqrt operand can never go negative)
        let vds = (vd * vd).min(p.max_norm_squared);
        let vqs = sqrtf(p.max_norm_squared - vds);
        let vq_ref_voltage = max_phase_voltage * vqs;

        let abs_iq_ref = fabsf(refs.iq_ref);

        // Id holding the Q-voltage constraint:
        // Id = (Vq_ref - Rs*|Iq| - omega*Ke) / (omega*Ls)
        refs.id_ref_fw_raw = (vq_ref_voltage
            - p.resistance * abs_iq_ref
            - omega * p.back_emf_constant)
            / (omega * p.inductance);

        // Low-pass so the allocator cannot excite the current loops
        refs.id_ref_fw_filtered +=
            (refs.id_ref_fw_raw - refs.id_ref_fw_filtered) * p.filter_gain;

        refs.id_ref = refs.id_ref_fw_filtered.clamp(p.max_negative_id_ref, 0.0);

        // Keep sqrt(Id² + Iq²) <= rated current
        let iq_headroom = (p.max_current_squared - refs.id_ref * refs.id_ref).max(0.0);
        refs.iq_ref_max = sqrtf(iq_headroom);
    } else {
        refs.id_ref = 0.0;
        refs.iq_ref_max = p.max_current;
        refs.id_ref_fw_filtered = 0.0;
        refs.id_ref_fw_raw = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fw_params() -> FluxWeakeningParams {
        FluxWeakeningParams {
            nominal_speed_elec: 1468.0,
            max_norm_squared: 0.9801,
            resistance: 0.285,
            inductance: 0.00032,
            back_emf_constant: 0.008,
            filter_gain: 0.0427,
            max_negative_id_ref: -3.0,
            max_current: 4.4,
            max_current_squared: 19.36,
        }
    }

    #[test]
    fn test_ramp_steps_toward_input() {
        let mut refs = ReferenceParams::new(4.4);
        refs.velocity_input = 100.0;
        for _ in 0..10 {
            refs.speed_ramp(0.5, 2.5);
        }
        assert!((refs.velocity_ref - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_ramp_snaps_inside_hysteresis() {
        let mut refs = ReferenceParams::new(4.4);
        refs.velocity_input = 1.0;
        refs.speed_ramp(0.5, 2.5);
        // diff below the band: no creeping, direct convergence
        assert_eq!(refs.velocity_ref, 1.0);
        refs.speed_ramp(0.5, 2.5);
        assert_eq!(refs.velocity_ref, 1.0);
    }

    #[test]
    fn test_ramp_decelerates_symmetrically() {
        let mut refs = ReferenceParams::new(4.4);
        refs.velocity_ref = 50.0;
        refs.velocity_input = 0.0;
        refs.speed_ramp(0.5, 2.5);
        assert!((refs.velocity_ref - 49.5).abs() < 1e-4);
    }

    #[test]
    fn test_flux_weakening_inactive_below_nominal() {
        let p = fw_params();
        let mut refs = ReferenceParams::new(p.max_current);
        refs.velocity_ref = 1000.0;
        refs.id_ref_fw_filtered = -1.0; // stale state must be discarded
        flux_weakening(&mut refs, 0.1, 13.8, &p);
        assert_eq!(refs.id_ref, 0.0);
        assert_eq!(refs.id_ref_fw_filtered, 0.0);
        assert_eq!(refs.id_ref_fw_raw, 0.0);
        assert_eq!(refs.iq_ref_max, p.max_current);
    }

    #[test]
    fn test_flux_weakening_produces_negative_id() {
        let p = fw_params();
        let mut refs = ReferenceParams::new(p.max_current);
        refs.velocity_ref = 1800.0;
        refs.iq_ref = 2.0;
        for _ in 0..500 {
            flux_weakening(&mut refs, 0.2, 13.8, &p);
        }
        assert!(refs.id_ref < 0.0);
        assert!(refs.id_ref >= p.max_negative_id_ref);
    }

    #[test]
    fn test_flux_weakening_current_circle_identity() {
        let p = fw_params();
        let mut refs = ReferenceParams::new(p.max_current);
        refs.velocity_ref = 1800.0;
        refs.iq_ref = 2.0;
        for _ in 0..200 {
            flux_weakening(&mut refs, 0.2, 13.8, &p);
            assert!(refs.iq_ref_max >= 0.0);
            let total = refs.id_ref * refs.id_ref + refs.iq_ref_max * refs.iq_ref_max;
            assert!((total - p.max_current_squared).abs() < 1e-3);
        }
    }

    #[test]
    fn test_flux_weakening_filter_converges_to_raw() {
        let p = fw_params();
        let mut refs = ReferenceParams::new(p.max_current);
        refs.velocity_ref = 1800.0;
        refs.iq_ref = 0.0;
        for _ in 0..2000 {
            flux_weakening(&mut refs, 0.0, 13.8, &p);
        }
        assert!((refs.id_ref_fw_filtered - refs.id_ref_fw_raw).abs() < 1e-3);
    }
}
