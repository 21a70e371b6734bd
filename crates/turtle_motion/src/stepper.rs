//! Two-motor stepper sequencer.
//!
//! Each profile advance is distributed over the two motors by an
//! independent Bresenham-style error accumulator per motor, so a motor
//! commanded `steps` physical steps over a movement's span of advances emits
//! them as evenly as integer arithmetic allows. Coil patterns are
//! half-step tables; both motors' pattern updates for one advance are
//! folded into a single bus write.

use crate::config::TurtleConfig;
use crate::profile::MotionProfile;

/// Atomic GPIO update for the stepper coils: set the bits in `set`,
/// clear the bits in `clear`, drive the bits in `enable` as outputs.
pub trait StepperBus {
    fn write(&mut self, set: u32, clear: u32, enable: u32);
}

/// Motionless ticks before the coils are de-energized to save power.
pub const MAX_IDLE_COUNT: u32 = 5000;

const STEP_SEQUENCE_COUNT: usize = 8;

// Left motor coils on GPIO 2, 15, 12, 14; right on GPIO 3, 5, 4, 0.
pub const LEFT_COIL_MASK: u32 = (1 << 2) | (1 << 15) | (1 << 12) | (1 << 14);
pub const RIGHT_COIL_MASK: u32 = (1 << 3) | (1 << 5) | (1 << 4) | (1 << 0);

// Half-step sequences: adjacent entries overlap one coil so the rotor
// sees eight positions per electrical cycle.
const LEFT_COIL_STEPS: [u32; STEP_SEQUENCE_COUNT] = [
    1 << 2,
    (1 << 2) | (1 << 15),
    1 << 15,
    (1 << 15) | (1 << 12),
    1 << 12,
    (1 << 12) | (1 << 14),
    1 << 14,
    (1 << 14) | (1 << 2),
];
const RIGHT_COIL_STEPS: [u32; STEP_SEQUENCE_COUNT] = [
    1 << 3,
    (1 << 3) | (1 << 5),
    1 << 5,
    (1 << 5) | (1 << 4),
    1 << 4,
    (1 << 4) | (1 << 0),
    1 << 0,
    (1 << 0) | (1 << 3),
];

/// One commanded movement. Step counts are signed (negative runs the
/// motor backwards); `tick_budget` only matters for non-accelerated
/// moves, where it sets the duration directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionRequest {
    pub left_steps: i32,
    pub right_steps: i32,
    pub tick_budget: u32,
    pub accelerate: bool,
}

/// Per-motor error accumulator state. The accumulator is wider than
/// the commanded counts so `2 * steps - span` cannot overflow for any
/// `i32` step count, `i32::MIN` included.
#[derive(Debug, Clone, Copy, Default)]
struct Axis {
    steps: i64,
    d: i64,
    emitted: i64,
    backwards: bool,
    coil: u8,
}

/// The stepper drive: one motion profile feeding two DDA axes, plus
/// the idle power-down counter.
#[derive(Debug)]
pub struct MotorDrive {
    profile: MotionProfile,
    axes: [Axis; 2],
    /// DDA denominator: the number of advances the movement spans.
    span: i64,
    active: bool,
    idle_ticks: u32,
}

impl MotorDrive {
    pub const fn new() -> Self {
        MotorDrive {
            profile: MotionProfile::new(),
            axes: [
                Axis {
                    steps: 0,
                    d: 0,
                    emitted: 0,
                    backwards: false,
                    coil: 0,
                },
                Axis {
                    steps: 0,
                    d: 0,
                    emitted: 0,
                    backwards: false,
                    coil: 0,
                },
            ],
            span: 0,
            active: false,
            idle_ticks: 0,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    /// Begins a movement. Returns false when there is nothing to do
    /// (both step counts zero); the caller should treat that as an
    /// already-completed motion.
    pub fn drive(&mut self, request: &MotionRequest, config: &TurtleConfig) -> bool {
        if request.left_steps == 0 && request.right_steps == 0 {
            self.active = false;
            return false;
        }

        let left = request.left_steps.unsigned_abs() as i64;
        let right = request.right_steps.unsigned_abs() as i64;
        let total = left.max(right);
        let span = if request.accelerate {
            total
        } else {
            request.tick_budget as i64
        };

        self.axes[0] = Axis {
            steps: left,
            d: 2 * left - span,
            emitted: 0,
            backwards: request.left_steps < 0,
            coil: self.axes[0].coil,
        };
        self.axes[1] = Axis {
            steps: right,
            d: 2 * right - span,
            emitted: 0,
            backwards: request.right_steps < 0,
            coil: self.axes[1].coil,
        };
        self.span = span;

        self.profile.start(
            total as u32,
            request.tick_budget,
            request.accelerate,
            config.acceleration_duration,
        );
        self.active = true;
        self.idle_ticks = 0;
        true
    }

    /// Abandons the current movement. The coils stay energized until
    /// the idle timeout releases them.
    pub fn halt(&mut self) {
        self.profile.halt();
        self.active = false;
    }

    /// One motor timer tick. Returns true when the current movement
    /// completed on this tick.
    pub fn tick<B: StepperBus>(&mut self, bus: &mut B) -> bool {
        if !self.active {
            self.idle_ticks += 1;
            if self.idle_ticks > MAX_IDLE_COUNT {
                // Idle too long; release the coils.
                bus.write(0, LEFT_COIL_MASK | RIGHT_COIL_MASK, LEFT_COIL_MASK | RIGHT_COIL_MASK);
                self.idle_ticks = 0;
            }
            return false;
        }
        self.idle_ticks = 0;

        let outcome = self.profile.tick();
        if outcome.advance {
            self.advance(bus);
        }
        if outcome.complete {
            self.active = false;
        }
        outcome.complete
    }

    /// One logical step advance: each motor's accumulator decides
    /// whether it steps, and the combined coil update goes out as a
    /// single write.
    fn advance<B: StepperBus>(&mut self, bus: &mut B) {
        let mut set = 0u32;
        let mut clear = 0u32;
        let mut enable = 0u32;

        let tables = [
            (&LEFT_COIL_STEPS, LEFT_COIL_MASK),
            (&RIGHT_COIL_STEPS, RIGHT_COIL_MASK),
        ];
        for (axis, (table, mask)) in self.axes.iter_mut().zip(tables) {
            if axis.steps == 0 {
                continue;
            }
            if axis.d > 0 {
                // Never emit past the commanded step count; float
                // rounding in a shrunk profile may run one advance long.
                if axis.emitted < axis.steps {
                    let turn: i8 = if axis.backwards { 1 } else { -1 };
                    axis.coil = ((axis.coil as i8 + turn).rem_euclid(STEP_SEQUENCE_COUNT as i8))
                        as u8;
                    let pattern = table[axis.coil as usize];
                    set |= pattern;
                    clear |= mask & !pattern;
                    enable |= mask;
                    axis.emitted += 1;
                }
                axis.d -= 2 * self.span;
            }
            axis.d += 2 * axis.steps;
        }

        if enable != 0 {
            bus.write(set, clear, enable);
        }
    }
}

impl Default for MotorDrive {
    fn default() -> Self {
        Self::new()
    }
}
