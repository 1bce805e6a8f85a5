// FOC (Field Oriented Control) module
// Encoder-based FOC implementation for PMSM motor control

pub mod controller;
pub mod encoder_position;
pub mod pi_controller;
pub mod reference;
pub mod svpwm;
pub mod transforms;

// Re-export main types for easier access
pub use controller::{AdcSample, FocController, PwmDuty};
pub use encoder_position::EncoderPosition;
pub use pi_controller::PiController;
pub use reference::ReferenceParams;
pub use svpwm::svpwm;
pub use transforms::{clarke, inverse_park, park, sin_cos};

/// Motor operating phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorState {
    /// PWM disabled, all loop state at rest
    Idle,
    /// Forced-angle current injection locking the rotor before closed loop
    Align,
    /// Full FOC with encoder feedback
    ClosedLoop,
}

/// Commanded rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Sign applied to speed and torque references.
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// Three-phase stator-frame current sample in amps.
///
/// Only phases a and b are measured; c follows from the sum-to-zero
/// invariant of a two-sensor setup.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseCurrents {
    #[inline]
    pub fn from_measured(a: f32, b: f32) -> Self {
        Self { a, b, c: -(a + b) }
    }
}

/// Stationary two-axis frame quantity (current or voltage).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlphaBeta {
    pub alpha: f32,
    pub beta: f32,
}

/// Rotor-synchronous frame quantity (current or voltage).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Dq {
    pub d: f32,
    pub q: f32,
}

/// Sine/cosine pair for one electrical angle, computed once per tick and
/// shared by the Park and inverse Park transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinCos {
    pub sin: f32,
    pub cos: f32,
}
