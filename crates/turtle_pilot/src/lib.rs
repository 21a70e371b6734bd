#![no_std]
#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! The cooperative runtime that couples the bytecode machine to the
//! motion engine.
//!
//! The machine executes one instruction per [`Pilot::poll`] call and
//! never blocks: motor and pen instructions park the instruction
//! stream in a single pending slot, and the motor/servo tick paths
//! reschedule it once the movement and a settling pause have passed.
//! The embedding firmware supplies the timer cadence by calling
//! [`Pilot::motor_tick`] and [`Pilot::servo_tick`] from its periodic
//! timers and [`Pilot::poll`] from its task loop.

pub mod protocol;

use turtle_machine::{Action, Fault, LoadError, Machine, Move, Pen, Program, Status};
use turtle_motion::config::TurtleConfig;
use turtle_motion::servo::{PenPosition, ServoPwm, ServoSequencer};
use turtle_motion::stepper::{MotionRequest, MotorDrive, StepperBus};

use crate::protocol::StatusReport;

/// Receives program status and pen position broadcasts. Fire and
/// forget: implementations must not block.
pub trait EventSink {
    fn program_status(&mut self, status: StatusReport);
    fn pen_position(&mut self, position: PenPosition);
}

/// The one continuation the instruction stream may be parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Motion,
    Servo,
}

/// Ticks of the alignment move used to synchronize the coil state
/// with the motors after power-up.
const ALIGN_STEPS: i32 = 8;

pub struct Pilot<B: StepperBus, P: ServoPwm, S: EventSink> {
    machine: Machine,
    motor: MotorDrive,
    servo: ServoSequencer,
    config: TurtleConfig,
    bus: B,
    pwm: P,
    sink: S,
    pending: Pending,
    instruction_due: bool,
    settle_ticks: u32,
}

impl<B: StepperBus, P: ServoPwm, S: EventSink> Pilot<B, P, S> {
    pub fn new(bus: B, pwm: P, sink: S) -> Self {
        Self::with_config(TurtleConfig::default(), bus, pwm, sink)
    }

    pub fn with_config(config: TurtleConfig, bus: B, pwm: P, sink: S) -> Self {
        Pilot {
            machine: Machine::new(),
            motor: MotorDrive::new(),
            servo: ServoSequencer::new(),
            config,
            bus,
            pwm,
            sink,
            pending: Pending::None,
            instruction_due: false,
            settle_ticks: 0,
        }
    }

    pub fn config(&self) -> &TurtleConfig {
        &self.config
    }

    /// Replaces the configuration. Takes effect from the next motion
    /// or servo request; an in-flight movement keeps its parameters.
    pub fn set_config(&mut self, config: TurtleConfig) {
        self.config = config;
    }

    pub fn status(&self) -> Status {
        self.machine.status()
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn pen_position(&self) -> PenPosition {
        self.servo.position()
    }

    /// Validates and starts a program. On success the first
    /// instruction runs on the next [`poll`](Self::poll); a rejected
    /// program leaves any running one untouched.
    pub fn run_program(&mut self, program: Program) -> Result<(), LoadError> {
        self.machine.load(program)?;
        self.motor.halt();
        self.pending = Pending::None;
        self.settle_ticks = 0;
        self.instruction_due = true;
        self.notify_status();
        Ok(())
    }

    /// Stops the running program and any in-flight movement. Safe to
    /// call at any time, including mid-motion.
    pub fn stop_program(&mut self) {
        self.machine.stop();
        self.motor.halt();
        self.pending = Pending::None;
        self.settle_ticks = 0;
        self.instruction_due = false;
        self.notify_status();
    }

    /// Runs each stepper through one full coil cycle, synchronizing
    /// the drive state with wherever the rotors physically are. Meant
    /// to be called once at power-up, before the first program.
    pub fn align_motors(&mut self) {
        self.motor.drive(
            &MotionRequest {
                left_steps: ALIGN_STEPS,
                right_steps: ALIGN_STEPS,
                tick_budget: ALIGN_STEPS as u32,
                accelerate: false,
            },
            &self.config,
        );
    }

    /// Executes at most one program instruction. Call from the task
    /// loop; does nothing unless an instruction is due, so a parked
    /// program costs nothing to poll.
    pub fn poll(&mut self) -> Result<(), Fault> {
        if !self.instruction_due || self.machine.status() != Status::Running {
            return Ok(());
        }
        self.instruction_due = false;

        match self.machine.step() {
            Ok(Action::Continue) => {
                self.instruction_due = true;
                Ok(())
            }
            Ok(Action::Halted) => {
                self.notify_status();
                Ok(())
            }
            Ok(Action::Move(movement)) => {
                let request = self.scale(movement);
                self.pending = Pending::Motion;
                if !self.motor.drive(&request, &self.config) {
                    // Zero-step movement; skip straight to settling.
                    self.begin_settle();
                }
                Ok(())
            }
            Ok(Action::Pen(pen)) => {
                self.pending = Pending::Servo;
                match pen {
                    Pen::Up => self.servo.raise(&self.config),
                    Pen::Down => self.servo.lower(&self.config),
                }
                Ok(())
            }
            Err(fault) => {
                // The machine has already freed its state and moved to
                // the error status.
                self.notify_status();
                Err(fault)
            }
        }
    }

    /// One stepper motor timer tick.
    pub fn motor_tick(&mut self) {
        if self.settle_ticks > 0 {
            self.settle_ticks -= 1;
            if self.settle_ticks == 0 && self.machine.status() == Status::Running {
                self.pending = Pending::None;
                self.instruction_due = true;
            }
        }

        let completed = self.motor.tick(&mut self.bus);
        if completed && self.pending == Pending::Motion && self.machine.status() == Status::Running
        {
            self.begin_settle();
        }
    }

    /// One servo timer tick.
    pub fn servo_tick(&mut self) {
        if self.servo.tick(&mut self.pwm) {
            self.sink.pen_position(self.servo.position());
            if self.pending == Pending::Servo && self.machine.status() == Status::Running {
                self.begin_settle();
            }
        }
    }

    /// Starts the post-movement settling pause, counted in motor
    /// ticks. Always at least one tick so resumption stays on the
    /// motor timer.
    fn begin_settle(&mut self) {
        let interval = self.config.motor_tick_interval.max(1);
        self.settle_ticks = (self.config.move_pause_duration / interval).max(1);
    }

    /// Converts a machine movement into motor step counts, applying
    /// the configured calibration ratios. Raw movements pass through
    /// unscaled.
    fn scale(&self, movement: Move) -> MotionRequest {
        let (left, right) = match movement {
            Move::Forward(mm) => (
                scale_by(mm, self.config.straight_steps_left, 100),
                scale_by(mm, self.config.straight_steps_right, 100),
            ),
            Move::Back(mm) => (
                -scale_by(mm, self.config.straight_steps_left, 100),
                -scale_by(mm, self.config.straight_steps_right, 100),
            ),
            Move::Left(deg) => (
                -scale_by(deg, self.config.turn_steps_left, 90),
                scale_by(deg, self.config.turn_steps_right, 90),
            ),
            Move::Right(deg) => (
                scale_by(deg, self.config.turn_steps_left, 90),
                -scale_by(deg, self.config.turn_steps_right, 90),
            ),
            Move::Raw { left, right } => (left, right),
        };
        MotionRequest {
            left_steps: left,
            right_steps: right,
            tick_budget: 0,
            accelerate: true,
        }
    }

    fn notify_status(&mut self) {
        let report = match self.machine.status() {
            Status::Idle => StatusReport::Idle,
            Status::Error => StatusReport::Error,
            Status::Running => match self.machine.pc() {
                Some(pc) => StatusReport::Running {
                    function: pc.function as u32,
                    offset: pc.offset as u32,
                },
                None => StatusReport::Idle,
            },
        };
        self.sink.program_status(report);
    }
}

/// `value * numerator / denominator` in i64, clamped back to i32.
fn scale_by(value: i32, numerator: u32, denominator: u32) -> i32 {
    let scaled = value as i64 * numerator as i64 / denominator as i64;
    scaled.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
