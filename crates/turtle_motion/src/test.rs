use crate::config::TurtleConfig;
use crate::servo::{duty_for_angle, PenPosition, ServoPwm, ServoSequencer};
use crate::stepper::{
    LEFT_COIL_MASK, MAX_IDLE_COUNT, MotionRequest, MotorDrive, RIGHT_COIL_MASK, StepperBus,
};

extern crate std;
use std::vec::Vec as StdVec;

#[derive(Default)]
struct RecordingBus {
    writes: StdVec<(u32, u32, u32)>,
}

impl StepperBus for RecordingBus {
    fn write(&mut self, set: u32, clear: u32, enable: u32) {
        self.writes.push((set, clear, enable));
    }
}

#[derive(Default)]
struct RecordingPwm {
    duties: StdVec<u32>,
}

impl ServoPwm for RecordingPwm {
    fn set_duty(&mut self, duty: u32) {
        self.duties.push(duty);
    }
}

/// Which ticks each motor physically stepped on, and how long the
/// movement ran.
struct StepTrace {
    left: StdVec<u32>,
    right: StdVec<u32>,
    total_ticks: u32,
}

fn run_to_completion(drive: &mut MotorDrive, bus: &mut RecordingBus, cap: u32) -> StepTrace {
    let mut trace = StepTrace {
        left: StdVec::new(),
        right: StdVec::new(),
        total_ticks: 0,
    };
    for tick in 1..=cap {
        let before = bus.writes.len();
        let complete = drive.tick(bus);
        if bus.writes.len() > before {
            let (_, _, enable) = bus.writes[before];
            if enable & LEFT_COIL_MASK != 0 {
                trace.left.push(tick);
            }
            if enable & RIGHT_COIL_MASK != 0 {
                trace.right.push(tick);
            }
        }
        if complete {
            trace.total_ticks = tick;
            return trace;
        }
    }
    panic!("motion did not complete within {} ticks", cap);
}

fn count_in(ticks: &[u32], from: u32, to: u32) -> usize {
    ticks.iter().filter(|&&t| t >= from && t <= to).count()
}

#[test]
fn test_dda_spreads_steps() {
    let config = TurtleConfig::default();
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    assert!(drive.drive(
        &MotionRequest {
            left_steps: 5,
            right_steps: 3,
            tick_budget: 5,
            accelerate: false,
        },
        &config,
    ));
    let trace = run_to_completion(&mut drive, &mut bus, 10);

    assert_eq!(trace.total_ticks, 5);
    assert_eq!(trace.left, &[1, 2, 3, 4, 5]);
    assert_eq!(trace.right, &[1, 3, 5]);
}

#[test]
fn test_plain_move_spans_tick_budget() {
    let config = TurtleConfig::default();
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    drive.drive(
        &MotionRequest {
            left_steps: 50,
            right_steps: 50,
            tick_budget: 100,
            accelerate: false,
        },
        &config,
    );
    let trace = run_to_completion(&mut drive, &mut bus, 200);

    // 50 steps spread over 100 ticks: every second tick.
    assert_eq!(trace.total_ticks, 100);
    assert_eq!(trace.left.len(), 50);
    assert_eq!(trace.left, trace.right);
    assert!(trace.left.iter().all(|t| t % 2 == 0));
}

#[test]
fn test_full_profile_step_counts() {
    let config = TurtleConfig {
        acceleration_duration: 120,
        ..TurtleConfig::default()
    };
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    drive.drive(
        &MotionRequest {
            left_steps: 400,
            right_steps: 400,
            tick_budget: 0,
            accelerate: true,
        },
        &config,
    );
    assert_eq!(drive.profile().accel_limit(), 120);
    assert_eq!(drive.profile().total_ticks(), 520);

    let trace = run_to_completion(&mut drive, &mut bus, 1000);
    assert_eq!(trace.total_ticks, 520);
    assert_eq!(trace.left.len(), 400);
    assert_eq!(trace.left, trace.right);

    // Ramp-up and ramp-down cover the same distance, cruise covers
    // the rest at one step per tick.
    let ramp_up = count_in(&trace.left, 1, 120);
    let cruise = count_in(&trace.left, 121, 400);
    let ramp_down = count_in(&trace.left, 401, 520);
    assert_eq!(ramp_up, 60);
    assert_eq!(cruise, 280);
    assert_eq!(ramp_down, 60);
}

#[test]
fn test_short_move_shrinks_ramp() {
    let config = TurtleConfig {
        acceleration_duration: 120,
        ..TurtleConfig::default()
    };
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    drive.drive(
        &MotionRequest {
            left_steps: 60,
            right_steps: 60,
            tick_budget: 0,
            accelerate: true,
        },
        &config,
    );

    // 60 steps cannot fit the full 120-tick ramp window; the bisection
    // settles on the smallest ramp that covers half the move.
    assert_eq!(drive.profile().accel_limit(), 89);
    assert_eq!(drive.profile().total_ticks(), 178);

    let trace = run_to_completion(&mut drive, &mut bus, 500);
    assert_eq!(trace.total_ticks, 178);
    assert_eq!(trace.left.len(), 60);
    assert_eq!(trace.right.len(), 60);
}

#[test]
fn test_extreme_step_counts_do_not_overflow() {
    let config = TurtleConfig::default();
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    // The full i32 range is valid input; i32::MIN has no positive
    // counterpart and must still run the motor backwards.
    assert!(drive.drive(
        &MotionRequest {
            left_steps: i32::MAX,
            right_steps: i32::MIN,
            tick_budget: 4,
            accelerate: false,
        },
        &config,
    ));
    let trace = run_to_completion(&mut drive, &mut bus, 10);
    assert_eq!(trace.total_ticks, 4);
    assert_eq!(trace.left.len(), 4);
    assert_eq!(trace.right.len(), 4);

    let (set, _, _) = bus.writes[0];
    assert_eq!(set & LEFT_COIL_MASK, (1 << 14) | (1 << 2));
    assert_eq!(set & RIGHT_COIL_MASK, (1 << 3) | (1 << 5));
}

#[test]
fn test_zero_step_request_is_immediate() {
    let config = TurtleConfig::default();
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    assert!(!drive.drive(
        &MotionRequest {
            left_steps: 0,
            right_steps: 0,
            tick_budget: 10,
            accelerate: false,
        },
        &config,
    ));
    assert!(!drive.active());
    assert!(!drive.tick(&mut bus));
    assert!(bus.writes.is_empty());
}

#[test]
fn test_idle_power_down() {
    let config = TurtleConfig::default();
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    for _ in 0..MAX_IDLE_COUNT {
        drive.tick(&mut bus);
    }
    assert!(bus.writes.is_empty());

    // One tick past the threshold releases both motors' coils.
    drive.tick(&mut bus);
    assert_eq!(
        bus.writes,
        &[(
            0,
            LEFT_COIL_MASK | RIGHT_COIL_MASK,
            LEFT_COIL_MASK | RIGHT_COIL_MASK
        )]
    );

    // A new request re-energizes by just driving patterns again.
    drive.drive(
        &MotionRequest {
            left_steps: 2,
            right_steps: 2,
            tick_budget: 2,
            accelerate: false,
        },
        &config,
    );
    let trace = run_to_completion(&mut drive, &mut bus, 10);
    assert_eq!(trace.left.len(), 2);
}

#[test]
fn test_halt_stops_motion() {
    let config = TurtleConfig::default();
    let mut drive = MotorDrive::new();
    let mut bus = RecordingBus::default();

    drive.drive(
        &MotionRequest {
            left_steps: 100,
            right_steps: 100,
            tick_budget: 100,
            accelerate: false,
        },
        &config,
    );
    drive.tick(&mut bus);
    drive.tick(&mut bus);
    drive.halt();
    assert!(!drive.active());

    let writes = bus.writes.len();
    for _ in 0..10 {
        assert!(!drive.tick(&mut bus));
    }
    assert_eq!(bus.writes.len(), writes);
}

#[test]
fn test_servo_truncating_steps_snap_to_target() {
    let config = TurtleConfig {
        servo_move_steps: 7,
        ..TurtleConfig::default()
    };
    let mut servo = ServoSequencer::new();
    let mut pwm = RecordingPwm::default();

    servo.lower(&config);
    assert_eq!(servo.position(), PenPosition::Down);

    // 30 degrees over 7 steps truncates to 4 per tick; the final tick
    // absorbs the remainder.
    for _ in 0..6 {
        assert!(!servo.tick(&mut pwm));
    }
    assert_eq!(servo.angle(), -24);
    assert!(servo.tick(&mut pwm));
    assert_eq!(servo.angle(), -30);
    assert_eq!(pwm.duties.last(), Some(&duty_for_angle(-30)));
    assert!(!servo.active());
}

#[test]
fn test_servo_single_step() {
    let config = TurtleConfig {
        servo_move_steps: 1,
        ..TurtleConfig::default()
    };
    let mut servo = ServoSequencer::new();
    let mut pwm = RecordingPwm::default();

    servo.raise(&config);
    assert!(servo.tick(&mut pwm));
    assert_eq!(servo.angle(), config.servo_up_angle);
    assert_eq!(pwm.duties.len(), 1);
}

#[test]
fn test_servo_round_trip_has_no_drift() {
    let config = TurtleConfig {
        servo_move_steps: 7,
        ..TurtleConfig::default()
    };
    let mut servo = ServoSequencer::new();
    let mut pwm = RecordingPwm::default();

    for _ in 0..3 {
        servo.raise(&config);
        while !servo.tick(&mut pwm) {}
        assert_eq!(servo.angle(), config.servo_up_angle);

        servo.lower(&config);
        while !servo.tick(&mut pwm) {}
        assert_eq!(servo.angle(), config.servo_down_angle);
    }
    assert_eq!(servo.position(), PenPosition::Down);
}

#[test]
fn test_servo_clamps_target() {
    let config = TurtleConfig::default();
    let mut servo = ServoSequencer::new();
    let mut pwm = RecordingPwm::default();

    servo.start(120, &config);
    while !servo.tick(&mut pwm) {}
    assert_eq!(servo.angle(), 90);
}

#[test]
fn test_duty_interpolation() {
    assert_eq!(duty_for_angle(-90), 22_222);
    assert_eq!(duty_for_angle(0), 33_333);
    assert_eq!(duty_for_angle(90), 44_444);
}

#[test]
fn test_servo_interval() {
    let config = TurtleConfig {
        servo_move_steps: 1,
        ..TurtleConfig::default()
    };
    assert_eq!(ServoSequencer::interval(&config), 1);

    let config = TurtleConfig::default();
    assert_eq!(ServoSequencer::interval(&config), config.servo_tick_interval);
}

#[test]
fn test_config_defaults() {
    let config = TurtleConfig::default();
    assert_eq!(config.straight_steps_left, 1729);
    assert_eq!(config.straight_steps_right, 1729);
    assert_eq!(config.turn_steps_left, 2052);
    assert_eq!(config.turn_steps_right, 2052);
}
