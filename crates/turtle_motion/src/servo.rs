//! Pen servo sequencer.
//!
//! The pen lift is a hobby servo on a 20 ms PWM period; -90 degrees is
//! a 1 ms pulse and +90 degrees a 2 ms pulse. A movement is spread
//! linearly over a configured number of ticks, with the final tick
//! snapping exactly to the target so repeated moves never accumulate
//! rounding drift.

use serde::{Deserialize, Serialize};

use crate::config::TurtleConfig;

/// Sets the servo PWM duty cycle, in the same units as
/// [`PWM_PERIOD`].
pub trait ServoPwm {
    fn set_duty(&mut self, duty: u32);
}

/// PWM period, 20 ms.
pub const PWM_PERIOD: u32 = 20_000;
// 1 ms and 2 ms pulse widths in duty units.
const PWM_MIN: u32 = 22_222;
const PWM_MAX: u32 = 44_444;

/// Where the pen is (or is headed, while a movement runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenPosition {
    Up,
    Down,
}

/// Duty cycle for a servo angle in [-90, 90].
pub fn duty_for_angle(angle: i8) -> u32 {
    ((angle as i32 + 90) as u32 * (PWM_MAX - PWM_MIN) / 180) + PWM_MIN
}

#[derive(Debug)]
pub struct ServoSequencer {
    angle: i8,
    destination: i8,
    step: u8,
    step_size: i8,
    move_steps: u8,
    position: PenPosition,
    active: bool,
}

impl ServoSequencer {
    pub const fn new() -> Self {
        ServoSequencer {
            angle: 0,
            destination: 0,
            step: 0,
            step_size: 0,
            move_steps: 0,
            position: PenPosition::Up,
            active: false,
        }
    }

    pub fn position(&self) -> PenPosition {
        self.position
    }

    pub fn angle(&self) -> i8 {
        self.angle
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Starts moving the pen to the configured "up" angle.
    pub fn raise(&mut self, config: &TurtleConfig) {
        self.position = PenPosition::Up;
        self.start(config.servo_up_angle, config);
    }

    /// Starts moving the pen to the configured "down" angle.
    pub fn lower(&mut self, config: &TurtleConfig) {
        self.position = PenPosition::Down;
        self.start(config.servo_down_angle, config);
    }

    /// Starts a movement to `target` degrees, clamped to [-90, 90].
    pub fn start(&mut self, target: i8, config: &TurtleConfig) {
        self.destination = target.clamp(-90, 90);
        self.move_steps = config.servo_move_steps.max(1);
        // Integer division truncates; the final tick snaps to the
        // destination to absorb the remainder. The sweep can span up
        // to 180 degrees, so the difference is taken in i32.
        let size = (self.destination as i32 - self.angle as i32) / self.move_steps as i32;
        self.step_size = size.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
        self.step = 0;
        self.active = true;
    }

    /// Milliseconds between servo ticks for the current configuration.
    /// A single-step movement uses the minimum interval.
    pub fn interval(config: &TurtleConfig) -> u32 {
        if config.servo_move_steps == 1 {
            1
        } else {
            config.servo_tick_interval
        }
    }

    /// One servo timer tick. Returns true when the movement completed
    /// on this tick.
    pub fn tick<P: ServoPwm>(&mut self, pwm: &mut P) -> bool {
        if !self.active {
            return false;
        }

        self.angle = self.angle.saturating_add(self.step_size);
        self.step += 1;
        let done = self.step >= self.move_steps;
        if done {
            self.angle = self.destination;
        }

        pwm.set_duty(duty_for_angle(self.angle));

        if done {
            self.active = false;
        }
        done
    }
}

impl Default for ServoSequencer {
    fn default() -> Self {
        Self::new()
    }
}
