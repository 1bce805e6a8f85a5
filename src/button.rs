//! Debounced switch handling.
//!
//! Raw switch levels are sampled by the background poll; an accepted press
//! opens a dead interval during which further level changes are ignored.
//! Presses are turned into [`MotorAction`] values and dispatched through a
//! single handler rather than per-button callbacks, so the debounce state
//! machine stays reusable across independent switches.

/// Command issued by the operator UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorAction {
    Start,
    Stop,
    ToggleDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceState {
    /// Accepting presses
    Ready,
    /// Ignoring the switch until the debounce interval elapses
    Wait,
}

/// Debounce state machine for one switch
pub struct ButtonDebounce {
    state: DebounceState,
    counter: u32,
    /// Poll invocations the switch stays ignored after an accepted press
    hold_polls: u32,
}

impl ButtonDebounce {
    pub fn new(hold_polls: u32) -> Self {
        Self {
            state: DebounceState::Ready,
            counter: 0,
            hold_polls,
        }
    }

    /// Sample the raw switch level once
    ///
    /// # Arguments
    /// * `pressed` - Current raw level, active = pressed
    ///
    /// # Returns
    /// `true` exactly once per accepted press
    pub fn poll(&mut self, pressed: bool) -> bool {
        match self.state {
            DebounceState::Ready => {
                if pressed {
                    self.counter = 0;
                    self.state = DebounceState::Wait;
                    return true;
                }
                false
            }
            DebounceState::Wait => {
                if self.counter >= self.hold_polls {
                    self.state = DebounceState::Ready;
                    self.counter = 0;
                } else {
                    self.counter += 1;
                }
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = DebounceState::Ready;
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_reported_once() {
        let mut button = ButtonDebounce::new(5);
        assert!(button.poll(true));
        // Held or bouncing level stays silent during the dead interval
        for _ in 0..5 {
            assert!(!button.poll(true));
        }
    }

    #[test]
    fn test_second_press_after_debounce_interval() {
        let mut button = ButtonDebounce::new(3);
        assert!(button.poll(true));
        for _ in 0..4 {
            button.poll(false);
        }
        assert!(button.poll(true));
    }

    #[test]
    fn test_released_switch_never_fires() {
        let mut button = ButtonDebounce::new(3);
        for _ in 0..10 {
            assert!(!button.poll(false));
        }
    }

    #[test]
    fn test_bounce_within_interval_ignored() {
        let mut button = ButtonDebounce::new(10);
        assert!(button.poll(true));
        // Contact bounce: alternating levels inside the interval
        for i in 0..8 {
            assert!(!button.poll(i % 2 == 0));
        }
    }
}
