#![no_std]

//! Bytecode virtual machine for the micro-turtle. A program is a set
//! of functions (function 0 is the entry point) sharing one array of
//! global variables. Each function activation gets its own frame with
//! local variable slots and a bounded operand stack.
//!
//! The machine is deliberately inert: [`Machine::step`] executes
//! exactly one instruction and hands any motor or servo work back to
//! the caller as an [`Action`]. The caller decides when the next
//! instruction runs, which is how long motor moves suspend the
//! instruction stream without blocking anything.
//!
//! All values are 32-bit signed integers. There is no heap; every
//! buffer is a fixed-capacity `heapless::Vec`, so a `Machine` is one
//! flat blob of state with no allocation on any path.

use core::mem::transmute;
use heapless::Vec;
use thiserror_no_std::Error;
use variant_count::VariantCount;

pub mod builder;

/// Maximum number of global variables, and of locals per function.
pub const MAX_VAR_COUNT: usize = 32;

/// Maximum operand stack depth a function may declare.
pub const MAX_STACK_SIZE: usize = 32;

/// Maximum number of functions in a program, including the entry function.
pub const MAX_FUNC_COUNT: usize = 64;

/// Maximum length of one function's bytecode.
pub const MAX_FUNC_LEN: usize = 2048;

/// Maximum call depth before a CALL faults.
pub const MAX_CALL_DEPTH: usize = 64;

/// Local slots per frame: arguments plus locals, each capped at MAX_VAR_COUNT.
pub const MAX_LOCAL_SLOTS: usize = 2 * MAX_VAR_COUNT;

#[repr(u8)]
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Fd = 1,
    Bk,
    Lt,
    Rt,
    Pu,
    Pd,
    IAdd,
    ISub,
    IMul,
    IDiv,
    IConst0,
    IConst1,
    IConst45,
    IConst90,
    IConst,
    ILoad0,
    ILoad1,
    ILoad2,
    ILoad,
    IStore0,
    IStore1,
    IStore2,
    IStore,
    GLoad0,
    GLoad1,
    GLoad2,
    GLoad,
    GStore0,
    GStore1,
    GStore2,
    GStore,
    ILt,
    ILe,
    IGt,
    IGe,
    IEq,
    INe,
    Call,
    Ret,
    Stop,
    Br,
    Brt,
    Brf,
    FdRaw,
    BkRaw,
    LtRaw,
    RtRaw,
}

impl Opcode {
    /// Encoded length in bytes, including the opcode byte itself.
    pub fn encoded_len(self) -> usize {
        match self {
            Opcode::IConst
            | Opcode::ILoad
            | Opcode::IStore
            | Opcode::GLoad
            | Opcode::GStore
            | Opcode::Call
            | Opcode::Br
            | Opcode::Brt
            | Opcode::Brf => 5,
            _ => 1,
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Fault;
    fn try_from(value: u8) -> Result<Self, Fault> {
        // Discriminants are contiguous starting at 1; zero is reserved
        // as "not an instruction".
        if value == 0 || value > Opcode::VARIANT_COUNT as u8 {
            return Err(Fault::UnknownOpcode(value));
        }

        // SAFETY: the value is a valid discriminant, checked above.
        let op = unsafe { transmute::<u8, Self>(value) };
        Ok(op)
    }
}

/// Structural problems that make a program unloadable. Checked before
/// any machine state changes, so a rejected program never disturbs a
/// running one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    #[error("program defines no functions")]
    NoFunctions,
    #[error("too many global variables ({0})")]
    TooManyGlobals(usize),
    #[error("function {function} has too many arguments ({count})")]
    TooManyArguments { function: usize, count: usize },
    #[error("function {function} has too many local variables ({count})")]
    TooManyLocals { function: usize, count: usize },
    #[error("function {function} declares too large an operand stack ({count})")]
    StackTooLarge { function: usize, count: usize },
    #[error("function {0} has no code")]
    EmptyFunction(usize),
}

/// Runtime faults. Every one of these is terminal: the machine frees
/// all program state and lands in [`Status::Error`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("end of function reached without RET or STOP")]
    CodeOverrun,
    #[error("unknown instruction {0}")]
    UnknownOpcode(u8),
    #[error("operand stack overflow")]
    StackOverflow,
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("local variable {0} out of range")]
    LocalOutOfRange(i32),
    #[error("global variable {0} out of range")]
    GlobalOutOfRange(i32),
    #[error("invalid function {0} for CALL instruction")]
    InvalidCallTarget(i32),
    #[error("call depth limit reached")]
    CallDepthExceeded,
    #[error("attempt to RET from the entry function")]
    ReturnFromMain,
    #[error("branch target {0} outside function")]
    BranchOutOfRange(i32),
    #[error("integer division by zero")]
    DivisionByZero,
}

/// One function definition. `argument_count + local_count` is the
/// frame's local slot count; slots `0..argument_count` are filled from
/// the caller's operand stack on CALL.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub argument_count: usize,
    pub local_count: usize,
    pub stack_size: usize,
    pub code: Vec<u8, MAX_FUNC_LEN>,
}

/// An immutable turtle program. Function 0 is the entry point.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub global_count: usize,
    pub functions: Vec<Function, MAX_FUNC_COUNT>,
}

impl Program {
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

/// Program counter: a function and a byte offset into its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pc {
    pub function: usize,
    pub offset: usize,
}

/// One activation record.
#[derive(Debug)]
struct Frame {
    pc: Pc,
    locals: Vec<i32, MAX_LOCAL_SLOTS>,
    stack: Vec<i32, MAX_STACK_SIZE>,
    // Declared stack size of the function; may be smaller than the
    // vector's capacity, and pushing past it is a fault.
    stack_limit: usize,
}

impl Frame {
    fn new(function: usize, local_slots: usize, stack_limit: usize) -> Self {
        let mut locals = Vec::new();
        // Locals start zeroed; capacity covers MAX_VAR_COUNT twice, and
        // validation caps each component, so this cannot fail.
        let _ = locals.resize_default(local_slots);
        Frame {
            pc: Pc {
                function,
                offset: 0,
            },
            locals,
            stack: Vec::new(),
            stack_limit,
        }
    }
}

/// Program execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
    Error,
}

/// What the machine wants its embedder to do after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Schedule the next instruction.
    Continue,
    /// The program has ended; nothing further to schedule.
    Halted,
    /// Drive the motors, then resume the instruction stream once the
    /// motion (and any settling pause) completes.
    Move(Move),
    /// Move the pen servo, then resume once it completes.
    Pen(Pen),
}

/// A motor movement request as the program expressed it. `Forward` and
/// `Back` are millimetres, `Left` and `Right` are degrees; the embedder
/// applies the configured step scaling. `Raw` is unscaled step counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Forward(i32),
    Back(i32),
    Left(i32),
    Right(i32),
    Raw { left: i32, right: i32 },
}

/// Pen servo target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pen {
    Up,
    Down,
}

/// The virtual machine: at most one loaded program, its global
/// variables and its chain of stack frames.
#[derive(Debug)]
pub struct Machine {
    status: Status,
    program: Program,
    frames: Vec<Frame, MAX_CALL_DEPTH>,
    globals: Vec<i32, MAX_VAR_COUNT>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub const fn new() -> Self {
        Machine {
            status: Status::Idle,
            program: Program {
                global_count: 0,
                functions: Vec::new(),
            },
            frames: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Current program counter, if a program is running.
    pub fn pc(&self) -> Option<Pc> {
        self.frames.last().map(|frame| frame.pc)
    }

    /// Validates and installs a program, replacing (and stopping) any
    /// program already running. Validation happens first: a rejected
    /// program leaves the machine exactly as it was.
    pub fn load(&mut self, program: Program) -> Result<(), LoadError> {
        Self::validate(&program)?;

        // Drop any old program wholesale before installing the new one.
        self.clear();

        let entry = &program.functions[0];
        let frame = Frame::new(0, entry.argument_count + entry.local_count, entry.stack_size);
        if self.frames.push(frame).is_err() {
            // Depth 1 always fits; keep the machine idle if it somehow doesn't.
            return Err(LoadError::NoFunctions);
        }

        // Globals start zeroed so repeated runs are deterministic.
        let _ = self.globals.resize_default(program.global_count);
        self.program = program;
        self.status = Status::Running;
        Ok(())
    }

    fn validate(program: &Program) -> Result<(), LoadError> {
        if program.global_count > MAX_VAR_COUNT {
            return Err(LoadError::TooManyGlobals(program.global_count));
        }
        if program.functions.is_empty() {
            return Err(LoadError::NoFunctions);
        }
        // Function count and code length are capped by the heapless
        // capacities; the per-function counts are plain integers and
        // need explicit checks.
        for (id, function) in program.functions.iter().enumerate() {
            if function.argument_count > MAX_VAR_COUNT {
                return Err(LoadError::TooManyArguments {
                    function: id,
                    count: function.argument_count,
                });
            }
            if function.local_count > MAX_VAR_COUNT {
                return Err(LoadError::TooManyLocals {
                    function: id,
                    count: function.local_count,
                });
            }
            if function.stack_size > MAX_STACK_SIZE {
                return Err(LoadError::StackTooLarge {
                    function: id,
                    count: function.stack_size,
                });
            }
            if function.code.is_empty() {
                return Err(LoadError::EmptyFunction(id));
            }
        }
        Ok(())
    }

    /// Stops execution and frees the program, its frames and globals.
    pub fn stop(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.globals.clear();
        self.program = Program::default();
        self.status = Status::Idle;
    }

    /// Executes exactly one instruction. On a fault the machine frees
    /// all program state and moves to [`Status::Error`] before the
    /// fault is returned.
    pub fn step(&mut self) -> Result<Action, Fault> {
        if self.status != Status::Running {
            // Stale invocation; idle and errored machines hold no
            // frames, so there is nothing to run.
            return Ok(Action::Halted);
        }

        match self.dispatch() {
            Ok(action) => Ok(action),
            Err(fault) => {
                self.clear();
                self.status = Status::Error;
                Err(fault)
            }
        }
    }

    fn dispatch(&mut self) -> Result<Action, Fault> {
        let Some(frame) = self.frames.last() else {
            return Ok(Action::Halted);
        };
        let pc = frame.pc;
        let code = self.program.functions[pc.function].code.as_slice();
        let func_len = code.len();

        let Some(&byte) = code.get(pc.offset) else {
            return Err(Fault::CodeOverrun);
        };
        let op = Opcode::try_from(byte)?;
        if pc.offset + op.encoded_len() > func_len {
            return Err(Fault::CodeOverrun);
        }

        // Decode the immediate up front so the code borrow can end
        // before the frame stack is touched.
        let imm: i32 = if op.encoded_len() == 5 {
            i32::from_be_bytes([
                code[pc.offset + 1],
                code[pc.offset + 2],
                code[pc.offset + 3],
                code[pc.offset + 4],
            ])
        } else {
            0
        };

        let next_offset = pc.offset + op.encoded_len();
        let mut advance = true;
        let action = match op {
            Opcode::Fd => Action::Move(Move::Forward(self.pop()?)),
            Opcode::Bk => Action::Move(Move::Back(self.pop()?)),
            Opcode::Lt => Action::Move(Move::Left(self.pop()?)),
            Opcode::Rt => Action::Move(Move::Right(self.pop()?)),
            Opcode::FdRaw => {
                let right = self.pop()?;
                let left = self.pop()?;
                Action::Move(Move::Raw { left, right })
            }
            Opcode::BkRaw => {
                let right = self.pop()?;
                let left = self.pop()?;
                Action::Move(Move::Raw {
                    left: left.wrapping_neg(),
                    right: right.wrapping_neg(),
                })
            }
            Opcode::LtRaw => {
                let right = self.pop()?;
                let left = self.pop()?;
                Action::Move(Move::Raw {
                    left: left.wrapping_neg(),
                    right,
                })
            }
            Opcode::RtRaw => {
                let right = self.pop()?;
                let left = self.pop()?;
                Action::Move(Move::Raw {
                    left,
                    right: right.wrapping_neg(),
                })
            }
            Opcode::Pu => Action::Pen(Pen::Up),
            Opcode::Pd => Action::Pen(Pen::Down),
            Opcode::IAdd => {
                let (a, b) = self.pop2()?;
                self.push(a.wrapping_add(b))?;
                Action::Continue
            }
            Opcode::ISub => {
                let (a, b) = self.pop2()?;
                self.push(a.wrapping_sub(b))?;
                Action::Continue
            }
            Opcode::IMul => {
                let (a, b) = self.pop2()?;
                self.push(a.wrapping_mul(b))?;
                Action::Continue
            }
            Opcode::IDiv => {
                let (a, b) = self.pop2()?;
                if b == 0 {
                    return Err(Fault::DivisionByZero);
                }
                self.push(a.wrapping_div(b))?;
                Action::Continue
            }
            Opcode::IConst0 => {
                self.push(0)?;
                Action::Continue
            }
            Opcode::IConst1 => {
                self.push(1)?;
                Action::Continue
            }
            Opcode::IConst45 => {
                self.push(45)?;
                Action::Continue
            }
            Opcode::IConst90 => {
                self.push(90)?;
                Action::Continue
            }
            Opcode::IConst => {
                self.push(imm)?;
                Action::Continue
            }
            Opcode::ILoad0 => {
                self.load_local(0)?;
                Action::Continue
            }
            Opcode::ILoad1 => {
                self.load_local(1)?;
                Action::Continue
            }
            Opcode::ILoad2 => {
                self.load_local(2)?;
                Action::Continue
            }
            Opcode::ILoad => {
                self.load_local(imm)?;
                Action::Continue
            }
            Opcode::IStore0 => {
                self.store_local(0)?;
                Action::Continue
            }
            Opcode::IStore1 => {
                self.store_local(1)?;
                Action::Continue
            }
            Opcode::IStore2 => {
                self.store_local(2)?;
                Action::Continue
            }
            Opcode::IStore => {
                self.store_local(imm)?;
                Action::Continue
            }
            Opcode::GLoad0 => {
                self.load_global(0)?;
                Action::Continue
            }
            Opcode::GLoad1 => {
                self.load_global(1)?;
                Action::Continue
            }
            Opcode::GLoad2 => {
                self.load_global(2)?;
                Action::Continue
            }
            Opcode::GLoad => {
                self.load_global(imm)?;
                Action::Continue
            }
            Opcode::GStore0 => {
                self.store_global(0)?;
                Action::Continue
            }
            Opcode::GStore1 => {
                self.store_global(1)?;
                Action::Continue
            }
            Opcode::GStore2 => {
                self.store_global(2)?;
                Action::Continue
            }
            Opcode::GStore => {
                self.store_global(imm)?;
                Action::Continue
            }
            Opcode::ILt => {
                let (a, b) = self.pop2()?;
                self.push((a < b) as i32)?;
                Action::Continue
            }
            Opcode::ILe => {
                let (a, b) = self.pop2()?;
                self.push((a <= b) as i32)?;
                Action::Continue
            }
            Opcode::IGt => {
                let (a, b) = self.pop2()?;
                self.push((a > b) as i32)?;
                Action::Continue
            }
            Opcode::IGe => {
                let (a, b) = self.pop2()?;
                self.push((a >= b) as i32)?;
                Action::Continue
            }
            Opcode::IEq => {
                let (a, b) = self.pop2()?;
                self.push((a == b) as i32)?;
                Action::Continue
            }
            Opcode::INe => {
                let (a, b) = self.pop2()?;
                self.push((a != b) as i32)?;
                Action::Continue
            }
            Opcode::Call => {
                // The entry function is never a valid CALL target.
                if imm <= 0 || imm as usize >= self.program.function_count() {
                    return Err(Fault::InvalidCallTarget(imm));
                }
                let callee = imm as usize;
                let (argument_count, local_slots, stack_limit) = {
                    let f = &self.program.functions[callee];
                    (
                        f.argument_count,
                        f.argument_count + f.local_count,
                        f.stack_size,
                    )
                };

                // Land the caller just past the CALL before switching
                // frames, so RET resumes at the next instruction.
                if let Some(caller) = self.frames.last_mut() {
                    caller.pc.offset = next_offset;
                }

                // Arguments are pushed left to right and popped in
                // reverse, so the last value popped fills slot 0.
                let mut frame = Frame::new(callee, local_slots, stack_limit);
                for slot in (0..argument_count).rev() {
                    frame.locals[slot] = self.pop()?;
                }
                if self.frames.push(frame).is_err() {
                    return Err(Fault::CallDepthExceeded);
                }
                advance = false;
                Action::Continue
            }
            Opcode::Ret => {
                if self.frames.len() <= 1 {
                    return Err(Fault::ReturnFromMain);
                }
                self.frames.pop();
                advance = false;
                Action::Continue
            }
            Opcode::Stop => {
                self.clear();
                return Ok(Action::Halted);
            }
            Opcode::Br => {
                self.branch(imm, func_len)?;
                advance = false;
                Action::Continue
            }
            Opcode::Brt => {
                if self.pop()? != 0 {
                    self.branch(imm, func_len)?;
                    advance = false;
                }
                Action::Continue
            }
            Opcode::Brf => {
                if self.pop()? == 0 {
                    self.branch(imm, func_len)?;
                    advance = false;
                }
                Action::Continue
            }
        };

        if advance {
            if let Some(frame) = self.frames.last_mut() {
                frame.pc.offset = next_offset;
            }
        }
        Ok(action)
    }

    fn branch(&mut self, target: i32, func_len: usize) -> Result<(), Fault> {
        // A branch to exactly the function length is tolerated; the
        // next step then faults as a code overrun, matching the
        // bounds check at dispatch.
        if target < 0 || target as usize > func_len {
            return Err(Fault::BranchOutOfRange(target));
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.pc.offset = target as usize;
        }
        Ok(())
    }

    fn push(&mut self, value: i32) -> Result<(), Fault> {
        let frame = self.frames.last_mut().ok_or(Fault::StackOverflow)?;
        if frame.stack.len() >= frame.stack_limit {
            return Err(Fault::StackOverflow);
        }
        frame.stack.push(value).map_err(|_| Fault::StackOverflow)
    }

    fn pop(&mut self) -> Result<i32, Fault> {
        let frame = self.frames.last_mut().ok_or(Fault::StackUnderflow)?;
        frame.stack.pop().ok_or(Fault::StackUnderflow)
    }

    fn pop2(&mut self) -> Result<(i32, i32), Fault> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn load_local(&mut self, index: i32) -> Result<(), Fault> {
        let frame = self.frames.last().ok_or(Fault::StackUnderflow)?;
        let Some(&value) = usize::try_from(index)
            .ok()
            .and_then(|i| frame.locals.get(i))
        else {
            return Err(Fault::LocalOutOfRange(index));
        };
        self.push(value)
    }

    fn store_local(&mut self, index: i32) -> Result<(), Fault> {
        let value = self.pop()?;
        let frame = self.frames.last_mut().ok_or(Fault::StackUnderflow)?;
        let Some(slot) = usize::try_from(index)
            .ok()
            .and_then(|i| frame.locals.get_mut(i))
        else {
            return Err(Fault::LocalOutOfRange(index));
        };
        *slot = value;
        Ok(())
    }

    fn load_global(&mut self, index: i32) -> Result<(), Fault> {
        let Some(&value) = usize::try_from(index)
            .ok()
            .and_then(|i| self.globals.get(i))
        else {
            return Err(Fault::GlobalOutOfRange(index));
        };
        self.push(value)
    }

    fn store_global(&mut self, index: i32) -> Result<(), Fault> {
        let value = self.pop()?;
        let Some(slot) = usize::try_from(index)
            .ok()
            .and_then(|i| self.globals.get_mut(i))
        else {
            return Err(Fault::GlobalOutOfRange(index));
        };
        *slot = value;
        Ok(())
    }
}
