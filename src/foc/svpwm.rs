// Space Vector PWM (SVPWM) generation
//
// Uses a fast x/y/z coordinate transformation and sign-based sector
// detection instead of trigonometric functions. Inputs are the
// duty-normalized αβ voltage commands produced by the current controllers
// (bounded to the unit voltage circle), so no bus-voltage scaling happens
// here.

use libm::roundf;

use super::AlphaBeta;

const SQRT3: f32 = 1.732_050_8; // sqrt(3)

/// Calculate Space Vector PWM duty counts
///
/// # Arguments
/// * `v` - Normalized αβ voltage command, |v| <= 1
/// * `pwm_period` - Full-scale duty count of the PWM timer
///
/// # Returns
/// Duty counts for phases (a, b, c), each clamped to [0, pwm_period].
/// The null vector (0, 0) yields pwm_period / 2 on all three phases.
///
/// # Algorithm
/// 1. Convert α/β to x/y/z coordinates
/// 2. Determine sector (1-6) from the signs of x/y/z
/// 3. Calculate per-phase switching times directly from x/y/z
/// 4. Convert from range [-1, 1] to [0, pwm_period]
pub fn svpwm(v: AlphaBeta, pwm_period: u16) -> (u16, u16, u16) {
    // The x/y/z axes correspond to the six SVPWM sectors; comparing signs
    // is much faster than an atan2-based sector search.
    let sqrt3_alpha = SQRT3 * v.alpha;
    let x = v.beta;
    let y = (v.beta + sqrt3_alpha) / 2.0;
    let z = (v.beta - sqrt3_alpha) / 2.0;

    let sector: u8 = match (x >= 0.0, y >= 0.0, z >= 0.0) {
        (true, true, false) => 1,
        (_, true, true) => 2,
        (true, false, true) => 3,
        (false, false, true) => 4,
        (_, false, false) => 5,
        (false, true, false) => 6,
    };

    // Per-phase values in range [-1, 1]
    let (ta, tb, tc) = match sector {
        1 | 4 => (x - z, x + z, -x + z),
        2 | 5 => (y - z, y + z, -y - z),
        3 | 6 => (y - x, -y + x, -y - x),
        _ => (0.0, 0.0, 0.0), // Should never happen
    };

    let period = pwm_period as f32;
    let duty_a = roundf((ta + 1.0) / 2.0 * period).clamp(0.0, period) as u16;
    let duty_b = roundf((tb + 1.0) / 2.0 * period).clamp(0.0, period) as u16;
    let duty_c = roundf((tc + 1.0) / 2.0 * period).clamp(0.0, period) as u16;

    (duty_a, duty_b, duty_c)
}
