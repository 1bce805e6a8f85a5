// PMSM field-oriented control engine with quadrature encoder feedback
//
// The control math is hardware-agnostic: the fast current loop, the slow
// speed/reference loop and the motor state machine all live behind plain
// function calls so the same code runs inside the PWM-synchronous interrupt
// on a Cortex-M target and under the host test harness. Peripheral setup
// (ADC triggering, PWM timers, the encoder counter itself) is owned by the
// board layer and reaches this crate only through the traits in `runtime`.

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod button;
pub mod config;
pub mod foc;
pub mod runtime;

pub use button::MotorAction;
pub use config::{ControlStrategy, DerivedConfig, MotorConfig};
pub use foc::controller::{AdcSample, FocController, PwmDuty};
pub use foc::{Direction, MotorState};
