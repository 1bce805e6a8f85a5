// Motor state machine and control-loop orchestration
//
// `FocController` owns every piece of loop state under a single-writer
// discipline: the fast loop is the only mutator, the slow loop runs
// synchronously inside every Nth fast-loop call. `fast_loop` is the body
// of the PWM-synchronous interrupt and must stay allocation-free and
// bounded; start/stop/fault/direction are the command surface driven from
// the background task and the fault interrupt.

use core::f32::consts::{FRAC_PI_2, PI};

use crate::config::{ControlStrategy, DerivedConfig, MotorConfig};

use super::encoder_position::EncoderPosition;
use super::pi_controller::{voltage_circle_q_limit, PiController};
use super::reference::{flux_weakening, FluxWeakeningParams, ReferenceParams};
use super::svpwm::svpwm;
use super::transforms::{clarke, inverse_park, park, sin_cos};
use super::{Direction, Dq, MotorState, PhaseCurrents};

/// One fast-loop tick worth of raw ADC conversions
#[derive(Debug, Clone, Copy)]
pub struct AdcSample {
    /// Phase A shunt current, raw counts
    pub phase_a: u16,
    /// Phase B shunt current, raw counts
    pub phase_b: u16,
    /// DC-bus divider voltage, raw counts
    pub dc_bus: u16,
}

/// Three-phase duty command, each in [0, pwm_period_count]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmDuty {
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl PwmDuty {
    pub const fn neutral(pwm_period: u16) -> Self {
        let half = pwm_period / 2;
        Self {
            a: half,
            b: half,
            c: half,
        }
    }
}

/// Field-oriented motor controller
pub struct FocController {
    config: MotorConfig,
    derived: DerivedConfig,
    fw_params: FluxWeakeningParams,

    state: MotorState,
    direction: Direction,
    /// Latched overcurrent trip; cleared by the next start command
    fault_latched: bool,
    /// Gates whether the PWM bridge drives its outputs
    pwm_enabled: bool,

    /// Fast-loop ticks spent in ALIGN
    align_counter: u32,
    /// Fast-loop ticks since the last slow-loop invocation
    slow_loop_counter: u32,

    /// Commutation angle: forced during ALIGN, encoder-derived after
    angle: f32,
    encoder: EncoderPosition,
    refs: ReferenceParams,
    pi_d: PiController,
    pi_q: PiController,
    pi_speed: PiController,

    /// Measured currents in the rotating frame, amps
    i_dq: Dq,
    /// Voltage commands in the rotating frame, normalized
    v_dq: Dq,
    dc_bus_voltage: f32,
    /// Vbus / sqrt(3), the achievable phase voltage
    max_phase_voltage: f32,
}

impl FocController {
    pub fn new(config: MotorConfig) -> Self {
        let derived = config.derive();
        let fw_params = FluxWeakeningParams {
            nominal_speed_elec: derived.nominal_speed_elec,
            max_norm_squared: derived.max_norm_squared,
            resistance: config.phase_resistance,
            inductance: config.phase_inductance,
            back_emf_constant: derived.back_emf_per_rad_elec,
            filter_gain: derived.id_filter_gain,
            max_negative_id_ref: config.max_fw_negative_id,
            max_current: config.max_motor_current,
            max_current_squared: derived.max_current_squared,
        };
        let d = config.d_gains;
        let q = config.q_gains;
        let s = config.speed_gains;
        Self {
            state: MotorState::Idle,
            direction: Direction::Forward,
            fault_latched: false,
            pwm_enabled: false,
            align_counter: 0,
            slow_loop_counter: 0,
            angle: 0.0,
            encoder: EncoderPosition::new(config.encoder, &derived),
            refs: ReferenceParams::new(config.max_motor_current),
            pi_d: PiController::new_symmetric(d.kp, d.ki, d.kc, d.out_max),
            pi_q: PiController::new_symmetric(q.kp, q.ki, q.kc, q.out_max),
            pi_speed: PiController::new_symmetric(s.kp, s.ki, s.kc, s.out_max),
            i_dq: Dq::default(),
            v_dq: Dq::default(),
            dc_bus_voltage: 0.0,
            max_phase_voltage: 0.0,
            config,
            derived,
            fw_params,
        }
    }

    /// Start command: IDLE -> ALIGN
    ///
    /// Resets every controller, reference and position register before the
    /// first aligned tick; clears a latched fault. PWM resumes at the
    /// neutral (50%) duty so output enable cannot produce a voltage step.
    pub fn start(&mut self) {
        if self.state != MotorState::Idle {
            return;
        }
        self.fault_latched = false;
        self.pi_d.reset();
        self.pi_q
            .set_symmetric_limit(self.config.q_gains.out_max);
        self.pi_q.reset();
        self.pi_speed
            .set_symmetric_limit(self.config.speed_gains.out_max);
        self.pi_speed.reset();
        self.refs.reset(self.config.max_motor_current);
        self.encoder.reset(0);
        self.i_dq = Dq::default();
        self.v_dq = Dq::default();
        self.angle = 0.0;
        self.align_counter = 0;
        self.slow_loop_counter = 0;
        self.state = MotorState::Align;
        self.pwm_enabled = true;
        info!("motor start: entering field alignment");
    }

    /// Stop command: any state -> IDLE
    ///
    /// Disables PWM and zeroes the current references; position history is
    /// left in place and rebuilt by the next start.
    pub fn stop(&mut self) {
        self.state = MotorState::Idle;
        self.pwm_enabled = false;
        self.refs.id_ref = 0.0;
        self.refs.iq_ref = 0.0;
        self.i_dq = Dq::default();
        info!("motor stop");
    }

    /// Overcurrent fault: unconditional shutdown, no control math
    ///
    /// Safe to call from a context that preempts `fast_loop`; it only
    /// writes the state flags the next tick observes.
    pub fn fault(&mut self) {
        self.state = MotorState::Idle;
        self.pwm_enabled = false;
        self.refs.id_ref = 0.0;
        self.refs.iq_ref = 0.0;
        self.fault_latched = true;
        error!("overcurrent fault: forcing IDLE");
    }

    /// Direction toggle, honored only while stationary
    pub fn toggle_direction(&mut self) {
        if self.state == MotorState::Idle {
            self.direction = self.direction.toggled();
            info!("direction toggled");
        }
    }

    /// External velocity demand (magnitude, electrical rad/s)
    pub fn set_velocity_input(&mut self, velocity: f32) {
        self.refs.velocity_input = velocity.max(0.0);
    }

    /// External torque demand (magnitude, amps), used in torque mode
    pub fn set_torque_input(&mut self, current: f32) {
        self.refs.torque_input = current.max(0.0);
    }

    /// One PWM period of current control
    ///
    /// Executes the fixed sequence: current scaling, Clarke, reference/
    /// angle update for the active state, Park, D PI, voltage-circle Q
    /// bound, Q PI, inverse Park, SVPWM. Returns the neutral duty whenever
    /// the motor is not running; duties are always within the PWM period.
    pub fn fast_loop(&mut self, sample: AdcSample, encoder_count: u16) -> PwmDuty {
        self.dc_bus_voltage = sample.dc_bus as f32 * self.config.voltage_adc_scale;
        self.max_phase_voltage = self.dc_bus_voltage * 0.577_350_26;

        if self.state == MotorState::Idle {
            return PwmDuty::neutral(self.config.pwm_period_count);
        }

        // Offset-corrected phase currents; the shunt amplifiers invert
        let i_a = -((sample.phase_a as i32 - self.config.adc_offset_a as i32) as f32)
            * self.config.adc_current_scale;
        let i_b = -((sample.phase_b as i32 - self.config.adc_offset_b as i32) as f32)
            * self.config.adc_current_scale;
        let i_alpha_beta = clarke(PhaseCurrents::from_measured(i_a, i_b));

        match self.state {
            MotorState::Align => self.align_tick(encoder_count),
            MotorState::ClosedLoop => self.closed_loop_tick(encoder_count),
            MotorState::Idle => {} // returned above
        }

        let sc = sin_cos(self.angle);
        self.i_dq = park(i_alpha_beta, sc);

        // D PI, then dynamic D-priority allocation of the remaining
        // voltage budget to the Q controller
        self.v_dq.d = self.pi_d.update(self.refs.id_ref, self.i_dq.d);
        let q_limit = voltage_circle_q_limit(self.v_dq.d, self.derived.max_norm_squared);
        self.pi_q.set_limits(-q_limit, q_limit);
        self.v_dq.q = self.pi_q.update(self.refs.iq_ref, self.i_dq.q);

        let v_alpha_beta = inverse_park(self.v_dq, sc);
        let (a, b, c) = svpwm(v_alpha_beta, self.config.pwm_period_count);
        PwmDuty { a, b, c }
    }

    /// ALIGN: forced commutation angle with a ramped Q current
    ///
    /// Two equal sub-phases lock the rotor to a known electrical position
    /// regardless of the encoder zero offset: first π, then π/2 or 3π/2
    /// depending on direction. The current ramps linearly and the state
    /// machine hands over to CLOSED_LOOP once both sub-phases elapse.
    fn align_tick(&mut self, encoder_count: u16) {
        if self.align_counter < self.derived.align_ticks {
            self.align_counter += 1;
            self.angle = PI;
        } else if self.align_counter < 2 * self.derived.align_ticks {
            self.align_counter += 1;
            self.angle = match self.direction {
                Direction::Forward => 3.0 * FRAC_PI_2,
                Direction::Reverse => FRAC_PI_2,
            };
        } else {
            // Both sub-phases elapsed: drop stale alignment-phase history
            // before the first closed-loop speed estimate, and preload the
            // speed integrator with the ramped current for a bumpless
            // handover.
            self.encoder.reset(encoder_count);
            self.angle = 0.0;
            self.pi_speed.preload(self.refs.iq_ref);
            self.slow_loop_counter = 0;
            self.state = MotorState::ClosedLoop;
            info!("alignment complete: entering closed loop");
        }

        // Current ramp reaches align_q_current halfway through the first
        // sub-phase and holds it for the rest of ALIGN
        let step = self.derived.align_current_step;
        self.refs.iq_ref = match self.direction {
            Direction::Forward => (self.refs.iq_ref + step).min(self.config.align_q_current),
            Direction::Reverse => (self.refs.iq_ref - step).max(-self.config.align_q_current),
        };
        self.refs.id_ref = 0.0;
    }

    /// CLOSED_LOOP: encoder-derived angle, slow-loop cadence, references
    fn closed_loop_tick(&mut self, encoder_count: u16) {
        self.angle = self.encoder.update(encoder_count);

        self.slow_loop_counter += 1;
        if self.slow_loop_counter >= self.config.slow_loop_divider {
            self.slow_loop_counter = 0;
            self.encoder.update_speed(encoder_count);
            self.refs
                .speed_ramp(self.derived.ramp_delta, self.derived.speed_hysteresis);
        }

        match self.config.strategy {
            ControlStrategy::Speed => {
                // Speed PI output is the Q current reference; its bounds
                // shrink while flux weakening spends current budget on Id
                let speed_ref = self.direction.sign() * self.refs.velocity_ref;
                self.pi_speed
                    .set_limits(-self.refs.iq_ref_max, self.refs.iq_ref_max);
                self.refs.iq_ref = self.pi_speed.update(speed_ref, self.encoder.speed());

                if self.config.flux_weakening {
                    flux_weakening(
                        &mut self.refs,
                        self.v_dq.d,
                        self.max_phase_voltage,
                        &self.fw_params,
                    );
                } else {
                    self.refs.id_ref = 0.0;
                }
            }
            ControlStrategy::Torque => {
                let iq = self
                    .refs
                    .torque_input
                    .min(self.config.torque_mode_max_current);
                self.refs.iq_ref = self.direction.sign() * iq;
                self.refs.id_ref = 0.0;
                self.refs.iq_ref_max = self.config.torque_mode_max_current;
            }
        }
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != MotorState::Idle
    }

    pub fn pwm_enabled(&self) -> bool {
        self.pwm_enabled
    }

    pub fn fault_latched(&self) -> bool {
        self.fault_latched
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Neutral (null-vector) duty for this configuration
    pub fn neutral_duty(&self) -> PwmDuty {
        PwmDuty::neutral(self.config.pwm_period_count)
    }

    pub fn references(&self) -> &ReferenceParams {
        &self.refs
    }

    pub fn estimator(&self) -> &EncoderPosition {
        &self.encoder
    }

    /// Measured rotor-frame currents from the last tick, amps
    pub fn currents(&self) -> Dq {
        self.i_dq
    }

    /// Normalized voltage commands from the last tick
    pub fn voltages(&self) -> Dq {
        self.v_dq
    }

    pub fn dc_bus_voltage(&self) -> f32 {
        self.dc_bus_voltage
    }

    /// Latest electrical angular speed estimate, rad/s
    pub fn speed(&self) -> f32 {
        self.encoder.speed()
    }

    #[cfg(test)]
    pub(crate) fn speed_integral(&self) -> f32 {
        self.pi_speed.integral()
    }
}
