use serde::{Deserialize, Serialize};

/// Calibration and timing parameters for the whole motion system.
///
/// The storage/HTTP layer that persists and updates this lives outside
/// the core; the sequencers re-read the relevant fields at the start of
/// each request, so a changed configuration takes effect on the next
/// movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurtleConfig {
    /// Steps for the left motor to move the turtle 100 mm.
    pub straight_steps_left: u32,
    /// Steps for the right motor to move the turtle 100 mm.
    pub straight_steps_right: u32,
    /// Steps for the left motor to turn the turtle 90 degrees.
    pub turn_steps_left: u32,
    /// Steps for the right motor to turn the turtle 90 degrees.
    pub turn_steps_right: u32,
    /// Servo angle when the pen is held up, in degrees.
    pub servo_up_angle: i8,
    /// Servo angle when the pen is held down, in degrees.
    pub servo_down_angle: i8,
    /// Number of discrete steps a servo movement is spread over.
    pub servo_move_steps: u8,
    /// Milliseconds per servo timer tick.
    pub servo_tick_interval: u32,
    /// Milliseconds per stepper motor timer tick.
    pub motor_tick_interval: u32,
    /// Ticks taken to ramp up to full speed.
    pub acceleration_duration: u32,
    /// Milliseconds to pause after a motor movement.
    pub move_pause_duration: u32,
}

impl Default for TurtleConfig {
    fn default() -> Self {
        // Step ratios are the measured values for the reference
        // chassis; the rest are conservative timing choices.
        TurtleConfig {
            straight_steps_left: 1729,
            straight_steps_right: 1729,
            turn_steps_left: 2052,
            turn_steps_right: 2052,
            servo_up_angle: 30,
            servo_down_angle: -30,
            servo_move_steps: 10,
            servo_tick_interval: 20,
            motor_tick_interval: 1,
            acceleration_duration: 600,
            move_pause_duration: 200,
        }
    }
}
