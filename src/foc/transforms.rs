// Coordinate transformations for FOC (Field Oriented Control)
// Clarke, Park and inverse Park transforms plus the sin/cos generator

use super::{AlphaBeta, Dq, PhaseCurrents, SinCos};

// Enable idsp-based fast trigonometric functions
const USE_IDSP_COSSIN: bool = true;

const ONE_BY_SQRT3: f32 = 0.577_350_26;

/// Clarke transformation (abc → αβ), two-current-sensor form
///
/// With balanced windings only two phase currents are needed:
/// alpha = a, beta = (a + 2b) / sqrt(3).
#[inline]
pub fn clarke(i: PhaseCurrents) -> AlphaBeta {
    AlphaBeta {
        alpha: i.a,
        beta: (i.a + 2.0 * i.b) * ONE_BY_SQRT3,
    }
}

/// Park transformation (αβ → dq)
///
/// Rotates a stationary-frame quantity into the rotor-synchronous frame.
#[inline]
pub fn park(v: AlphaBeta, sc: SinCos) -> Dq {
    Dq {
        d: v.alpha * sc.cos + v.beta * sc.sin,
        q: -v.alpha * sc.sin + v.beta * sc.cos,
    }
}

/// Inverse Park transformation (dq → αβ)
#[inline]
pub fn inverse_park(v: Dq, sc: SinCos) -> AlphaBeta {
    AlphaBeta {
        alpha: v.d * sc.cos - v.q * sc.sin,
        beta: v.d * sc.sin + v.q * sc.cos,
    }
}

/// Sine/cosine generator for the commutation angle
///
/// # Arguments
/// * `theta` - Electrical angle in radians, [0, 2π)
///
/// # Implementation
/// Uses idsp::cossin() for fast trigonometric calculation (~40 cycles on
/// Cortex-M) compared to libm::cosf/sinf (~100-200 cycles). Can be switched
/// via USE_IDSP_COSSIN; both stay within 1e-3 of reference values.
#[inline]
pub fn sin_cos(theta: f32) -> SinCos {
    if USE_IDSP_COSSIN {
        sin_cos_idsp(theta)
    } else {
        sin_cos_libm(theta)
    }
}

/// sin/cos using idsp::cossin() (fast, ~40 cycles on Cortex-M)
#[inline]
fn sin_cos_idsp(theta: f32) -> SinCos {
    // idsp uses i32::MIN (-2^31) to i32::MAX (2^31-1) to represent -π to π,
    // so normalize theta from [0, 2π) to [-π, π] first.
    use core::f32::consts::{PI, TAU};
    let normalized_theta = if theta > PI { theta - TAU } else { theta };

    // Scale to i32 range: phase = normalized_theta * (2^31 / π)
    const SCALE: f32 = 2147483648.0 / PI;
    let phase: i32 = (normalized_theta * SCALE) as i32;

    // cossin() returns (cos, sin) as i32 full-scale values
    let (cos_i32, sin_i32) = idsp::cossin(phase);

    const I32_TO_F32: f32 = 1.0 / 2147483648.0;
    SinCos {
        sin: sin_i32 as f32 * I32_TO_F32,
        cos: cos_i32 as f32 * I32_TO_F32,
    }
}

/// sin/cos using libm (slower, but more familiar)
#[inline]
fn sin_cos_libm(theta: f32) -> SinCos {
    SinCos {
        sin: libm::sinf(theta),
        cos: libm::cosf(theta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::{FRAC_PI_2, PI, TAU};

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_clarke_sum_to_zero_input() {
        let i = PhaseCurrents::from_measured(1.0, -0.5);
        assert!(approx_eq(i.c, -0.5, 1e-6));
        let ab = clarke(i);
        assert!(approx_eq(ab.alpha, 1.0, 1e-6));
        // beta = (1.0 + 2*(-0.5)) / sqrt(3) = 0
        assert!(approx_eq(ab.beta, 0.0, 1e-6));
    }

    #[test]
    fn test_park_zero_angle_is_identity() {
        let sc = sin_cos_libm(0.0);
        let dq = park(AlphaBeta { alpha: 1.0, beta: 0.5 }, sc);
        assert!(approx_eq(dq.d, 1.0, 1e-6));
        assert!(approx_eq(dq.q, 0.5, 1e-6));
    }

    #[test]
    fn test_park_inverse_park_round_trip() {
        for i in 0..64 {
            let theta = i as f32 * TAU / 64.0;
            let sc = sin_cos_libm(theta);
            let v = AlphaBeta {
                alpha: 0.7,
                beta: -1.3,
            };
            let back = inverse_park(park(v, sc), sc);
            assert!(approx_eq(back.alpha, v.alpha, 1e-6));
            assert!(approx_eq(back.beta, v.beta, 1e-6));
        }
    }

    #[test]
    fn test_sin_cos_idsp_matches_libm() {
        // Dense sweep including the 0/2π wrap neighbourhood
        for i in 0..=1000 {
            let theta = i as f32 * TAU / 1000.0;
            let fast = sin_cos_idsp(theta);
            let reference = sin_cos_libm(theta);
            assert!(approx_eq(fast.sin, reference.sin, 1e-3), "sin at {theta}");
            assert!(approx_eq(fast.cos, reference.cos, 1e-3), "cos at {theta}");
        }
    }

    #[test]
    fn test_sin_cos_quadrants() {
        let sc = sin_cos(FRAC_PI_2);
        assert!(approx_eq(sc.sin, 1.0, 1e-3));
        assert!(approx_eq(sc.cos, 0.0, 1e-3));
        let sc = sin_cos(PI);
        assert!(approx_eq(sc.sin, 0.0, 1e-3));
        assert!(approx_eq(sc.cos, -1.0, 1e-3));
    }
}
