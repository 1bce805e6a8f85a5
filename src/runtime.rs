//! Tick-driven control scheduling over hardware seams.
//!
//! The target wires three execution contexts: the PWM-synchronous ADC
//! interrupt (fast loop), a strictly higher-priority overcurrent interrupt,
//! and a cooperative background poll. This module models them as one
//! deterministic `tick()` so the identical sequencing runs under the host
//! test harness: the fault check always precedes the fast loop (the fault
//! interrupt would have preempted it), and the button poll runs on its own
//! divided cadence (it only ever runs when no interrupt work is pending).
//!
//! The fault path does no control math; it disables the bridge, forces the
//! state machine to IDLE and returns, keeping its worst-case latency
//! bounded.

use crate::button::{ButtonDebounce, MotorAction};
use crate::foc::controller::{AdcSample, FocController, PwmDuty};
use crate::foc::MotorState;

/// Phase-current and bus-voltage acquisition, one sample set per tick
pub trait CurrentSense {
    fn sample(&mut self) -> AdcSample;
}

/// Free-running quadrature counter
pub trait EncoderCounter {
    fn raw_count(&mut self) -> u16;
}

/// Three-phase PWM bridge
pub trait PwmBridge {
    fn apply(&mut self, duty: PwmDuty);
    /// Drive the outputs
    fn enable_output(&mut self);
    /// Force the outputs to their inactive state (duty registers keep
    /// their values)
    fn disable_output(&mut self);
}

/// Raw operator switch levels, active = pressed
pub trait Switches {
    fn start_stop_level(&mut self) -> bool;
    fn direction_level(&mut self) -> bool;
}

/// Control task wiring for one motor
pub struct ControlTasks<A, E, P, S>
where
    A: CurrentSense,
    E: EncoderCounter,
    P: PwmBridge,
    S: Switches,
{
    controller: FocController,
    adc: A,
    encoder: E,
    pwm: P,
    switches: S,
    start_stop_button: ButtonDebounce,
    direction_button: ButtonDebounce,
    /// Set from the overcurrent interrupt, consumed before the next tick's
    /// control math
    fault_pending: bool,
    poll_divider: u32,
    poll_counter: u32,
}

impl<A, E, P, S> ControlTasks<A, E, P, S>
where
    A: CurrentSense,
    E: EncoderCounter,
    P: PwmBridge,
    S: Switches,
{
    pub fn new(
        controller: FocController,
        adc: A,
        encoder: E,
        pwm: P,
        switches: S,
        debounce_polls: u32,
        poll_divider: u32,
    ) -> Self {
        Self {
            controller,
            adc,
            encoder,
            pwm,
            switches,
            start_stop_button: ButtonDebounce::new(debounce_polls),
            direction_button: ButtonDebounce::new(debounce_polls),
            fault_pending: false,
            poll_divider,
            poll_counter: 0,
        }
    }

    /// Flag an overcurrent trip. On hardware this is the body of the fault
    /// interrupt: flag-set and hardware-disable only.
    pub fn signal_fault(&mut self) {
        self.fault_pending = true;
        self.pwm.disable_output();
    }

    /// One PWM period: fault handling, fast loop, background poll
    pub fn tick(&mut self) {
        if self.fault_pending {
            self.fault_pending = false;
            self.controller.fault();
            self.pwm.apply(self.controller.neutral_duty());
            self.pwm.disable_output();
        }

        let sample = self.adc.sample();
        let count = self.encoder.raw_count();
        let duty = self.controller.fast_loop(sample, count);
        self.pwm.apply(duty);

        self.poll_counter += 1;
        if self.poll_counter >= self.poll_divider {
            self.poll_counter = 0;
            self.poll_buttons();
        }
    }

    /// Background task: map debounced presses to actions
    fn poll_buttons(&mut self) {
        let start_stop = self.switches.start_stop_level();
        if self.start_stop_button.poll(start_stop) {
            let action = if self.controller.is_running() {
                MotorAction::Stop
            } else {
                MotorAction::Start
            };
            self.dispatch(action);
        }

        // Direction changes are only meaningful while stationary
        let direction = self.switches.direction_level();
        if self.direction_button.poll(direction) && self.controller.state() == MotorState::Idle {
            self.dispatch(MotorAction::ToggleDirection);
        }
    }

    /// Single dispatch point for operator commands
    pub fn dispatch(&mut self, action: MotorAction) {
        debug!("dispatching motor action");
        match action {
            MotorAction::Start => {
                self.controller.start();
                // Neutral duty before the bridge drives anything
                self.pwm.apply(self.controller.neutral_duty());
                self.pwm.enable_output();
            }
            MotorAction::Stop => {
                self.controller.stop();
                self.pwm.apply(self.controller.neutral_duty());
                self.pwm.disable_output();
            }
            MotorAction::ToggleDirection => self.controller.toggle_direction(),
        }
    }

    pub fn controller(&self) -> &FocController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut FocController {
        &mut self.controller
    }
}
