//! Trapezoidal motion profile.
//!
//! A movement is split into up to five phases: two cubic acceleration
//! ramps, a constant-velocity cruise, and two mirrored deceleration
//! ramps. The profile answers one question per timer tick: has the
//! virtual carriage advanced by one whole step unit? The stepper
//! sequencer turns those advances into physical coil steps.
//!
//! All position math is single-precision float; the integer-crossing
//! points of these exact polynomials are what give each step its
//! timing, so the arithmetic must not be reordered or widened.

/// The phases an accelerated movement passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stationary,
    Accel1,
    Accel2,
    Cruising,
    Decel1,
    Decel2,
}

/// Outcome of one profile tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileTick {
    /// The carriage crossed an integer position this tick; the stepper
    /// sequencer should run one advance.
    pub advance: bool,
    /// The movement finished this tick. Reported exactly once.
    pub complete: bool,
}

#[derive(Debug)]
pub struct MotionProfile {
    phase: Phase,
    /// Ramp duration actually used; equals the configured acceleration
    /// duration for long moves, shrunk by bisection for short ones.
    accel_limit: u32,
    /// Half the configured acceleration duration; each of the four
    /// ramp phases is nominally this long.
    accel_duration: u32,
    cruise_duration: u32,
    phase_tick: u32,
    last_position: f32,
    total_ticks: u32,
    accelerating: bool,
}

impl MotionProfile {
    pub const fn new() -> Self {
        MotionProfile {
            phase: Phase::Stationary,
            accel_limit: 0,
            accel_duration: 0,
            cruise_duration: 0,
            phase_tick: 0,
            last_position: 0.0,
            total_ticks: 0,
            accelerating: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active(&self) -> bool {
        self.phase != Phase::Stationary
    }

    pub fn accel_limit(&self) -> u32 {
        self.accel_limit
    }

    /// Ticks the whole movement will take.
    pub fn total_ticks(&self) -> u32 {
        self.total_ticks
    }

    /// Begins a new movement of `total_units` step units. In
    /// accelerated mode the duration follows from the ramp shape; in
    /// plain mode the carriage advances once per tick for
    /// `tick_budget` ticks.
    pub fn start(&mut self, total_units: u32, tick_budget: u32, accelerate: bool, accel_config: u32) {
        self.phase = if accelerate { Phase::Accel1 } else { Phase::Cruising };
        self.accelerating = accelerate;
        self.phase_tick = 0;
        self.last_position = 0.0;

        if accelerate {
            self.accel_limit = accel_config;
            self.accel_duration = accel_config / 2;
            if self.accel_duration > total_units / 2 {
                // The move is too short to finish ramping up before it
                // must ramp down; shrink the ramp window.
                self.shrink(total_units);
            } else {
                self.cruise_duration = total_units - 2 * self.accel_duration;
            }
            self.total_ticks = 2 * self.accel_limit + self.cruise_duration;
        } else {
            self.accel_limit = 0;
            self.accel_duration = 0;
            self.cruise_duration = tick_budget;
            self.total_ticks = tick_budget;
        }
    }

    /// Abandons the current movement without completing it.
    pub fn halt(&mut self) {
        self.phase = Phase::Stationary;
        self.total_ticks = 0;
    }

    /// Bisection over candidate ramp durations: finds the smallest
    /// `accel_limit` whose ramp displacement reaches half the move,
    /// evaluating the same ramp polynomials the tick path uses.
    fn shrink(&mut self, total_units: u32) {
        let target = total_units / 2;
        let ad = self.accel_duration as f32;
        let crossover = (ad * ad * ad) / (6.0 * ad * ad);

        let mut left: u32 = 0;
        let mut right: u32 = self.accel_limit;
        while left < right {
            let mid = (left + right) / 2;
            let mut value = mid as f32;
            if mid <= self.accel_duration {
                value = (value * value * value) / (6.0 * ad * ad);
            } else {
                value -= ad;
                value = -((value * value * value) / (6.0 * ad * ad))
                    + ((value * value) / (2.0 * ad))
                    + (value / 2.0)
                    + crossover;
            }
            if (value as u32) < target {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        self.accel_limit = left;
        self.cruise_duration = total_units - 2 * target;
    }

    /// Advances the profile by one timer tick.
    pub fn tick(&mut self) -> ProfileTick {
        if self.phase == Phase::Stationary {
            return ProfileTick::default();
        }

        self.phase_tick += 1;
        let tick = self.phase_tick as f32;
        let ad = self.accel_duration as f32;
        let mut reset = false;
        let mut complete = false;

        let position = match self.phase {
            Phase::Stationary => 0.0,
            Phase::Accel1 => {
                let position = (tick * tick * tick) / (6.0 * ad * ad);
                if self.phase_tick >= self.accel_limit {
                    // Past the ramp window already; skip ahead.
                    self.phase = if self.cruise_duration > 0 {
                        Phase::Cruising
                    } else {
                        Phase::Decel1
                    };
                    reset = true;
                } else if self.phase_tick >= self.accel_duration {
                    self.phase = Phase::Accel2;
                    reset = true;
                }
                position
            }
            Phase::Accel2 => {
                let position = -((tick * tick * tick) / (6.0 * ad * ad))
                    + ((tick * tick) / (2.0 * ad))
                    + (tick / 2.0);
                if self.phase_tick + self.accel_duration >= self.accel_limit {
                    self.phase = if self.cruise_duration > 0 {
                        Phase::Cruising
                    } else {
                        Phase::Decel1
                    };
                    reset = true;
                } else if self.phase_tick >= self.accel_limit {
                    self.phase = Phase::Cruising;
                    reset = true;
                }
                position
            }
            Phase::Cruising => {
                let position = self.last_position + 1.0;
                if self.phase_tick >= self.cruise_duration {
                    if self.accelerating {
                        self.phase = Phase::Decel1;
                    } else {
                        // Plain moves have no deceleration phases.
                        complete = true;
                        self.phase = Phase::Stationary;
                    }
                    reset = true;
                }
                position
            }
            Phase::Decel1 => {
                let position = -((tick * tick * tick) / (6.0 * ad * ad)) + tick;
                if self.phase_tick >= self.accel_duration {
                    self.phase = Phase::Decel2;
                    reset = true;
                }
                position
            }
            Phase::Decel2 => {
                let position = (tick * tick * tick) / (6.0 * ad * ad)
                    - ((tick * tick) / (2.0 * ad))
                    + (tick / 2.0);
                if self.phase_tick >= self.accel_duration {
                    complete = true;
                    self.phase = Phase::Stationary;
                    reset = true;
                }
                position
            }
        };

        let advance = if position - self.last_position >= 1.0 {
            self.last_position += 1.0;
            true
        } else {
            false
        };

        if reset {
            // At each phase boundary, restart the phase clock and move
            // the integer-crossing reference with it so no step is
            // double-counted or skipped across the seam.
            self.phase_tick = 0;
            if self.accel_limit != 2 * self.accel_duration {
                if self.phase == Phase::Decel1 {
                    // The ramp was shrunk, so deceleration begins part
                    // way into the would-have-been full profile. Restate
                    // phase_tick as ticks from the end of the move and
                    // fold the position the skipped ticks would have
                    // covered into the reference.
                    let correction;
                    if self.accel_limit <= self.accel_duration {
                        self.phase = Phase::Decel2;
                        self.phase_tick = self.accel_duration - self.accel_limit;
                        let c = self.phase_tick as f32;
                        correction = (c * c * c) / (6.0 * ad * ad) - ((c * c) / (2.0 * ad))
                            + (c / 2.0);
                    } else {
                        self.phase_tick = 2 * self.accel_duration - self.accel_limit;
                        let c = self.phase_tick as f32;
                        correction = -((c * c * c) / (6.0 * ad * ad)) + c;
                    }
                    self.last_position += correction;
                } else if self.phase == Phase::Decel2 && self.accel_limit < self.accel_duration {
                    self.phase_tick = self.accel_duration - self.accel_limit;
                }
            }
            self.last_position -= position;
        }

        if complete {
            self.total_ticks = 0;
        }

        ProfileTick { advance, complete }
    }
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self::new()
    }
}
