//! Typed bytecode emitter. Programs are assembled function by
//! function:
//!
//! ```
//! use turtle_machine::builder::{Op, ProgramBuilder};
//!
//! let mut main = ProgramBuilder::new(0).function(0, 0, 2).unwrap();
//! main.op(Op::IConst(90)).unwrap();
//! main.op(Op::Rt).unwrap();
//! main.op(Op::Stop).unwrap();
//! let program = main.finish().build();
//! assert_eq!(program.function_count(), 1);
//! ```
//!
//! Small constants and low variable slots are emitted in their short
//! one-byte forms where the instruction set defines one.

use super::*;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("too many functions in program")]
    TooManyFunctions,
    #[error("function code exceeds the length limit")]
    CodeTooLong,
    #[error("branch patch offset {0} is not a branch immediate")]
    BadPatchOffset(u32),
}

/// One instruction, immediates included. Branch and call targets are
/// absolute byte offsets within the function; forward targets can be
/// emitted as placeholders and fixed up with
/// [`FunctionBuilder::patch_branch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Fd,
    Bk,
    Lt,
    Rt,
    FdRaw,
    BkRaw,
    LtRaw,
    RtRaw,
    Pu,
    Pd,
    IAdd,
    ISub,
    IMul,
    IDiv,
    IConst(i32),
    ILoad(u32),
    IStore(u32),
    GLoad(u32),
    GStore(u32),
    ILt,
    ILe,
    IGt,
    IGe,
    IEq,
    INe,
    Call(u32),
    Ret,
    Stop,
    Br(u32),
    Brt(u32),
    Brf(u32),
}

pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new(global_count: usize) -> Self {
        ProgramBuilder {
            program: Program {
                global_count,
                functions: Vec::new(),
            },
        }
    }

    /// Starts the next function. Functions get ids in the order they
    /// are built; the first one is the entry point.
    pub fn function(
        self,
        argument_count: usize,
        local_count: usize,
        stack_size: usize,
    ) -> Result<FunctionBuilder, BuildError> {
        if self.program.functions.is_full() {
            return Err(BuildError::TooManyFunctions);
        }
        Ok(FunctionBuilder {
            program: self,
            function: Function {
                argument_count,
                local_count,
                stack_size,
                code: Vec::new(),
            },
        })
    }

    pub fn build(self) -> Program {
        self.program
    }
}

pub struct FunctionBuilder {
    program: ProgramBuilder,
    function: Function,
}

impl FunctionBuilder {
    /// Byte offset the next instruction will be emitted at. Record it
    /// before emitting to obtain backward branch targets.
    pub fn here(&self) -> u32 {
        self.function.code.len() as u32
    }

    pub fn op(&mut self, op: Op) -> Result<(), BuildError> {
        match op {
            Op::Fd => self.byte(Opcode::Fd),
            Op::Bk => self.byte(Opcode::Bk),
            Op::Lt => self.byte(Opcode::Lt),
            Op::Rt => self.byte(Opcode::Rt),
            Op::FdRaw => self.byte(Opcode::FdRaw),
            Op::BkRaw => self.byte(Opcode::BkRaw),
            Op::LtRaw => self.byte(Opcode::LtRaw),
            Op::RtRaw => self.byte(Opcode::RtRaw),
            Op::Pu => self.byte(Opcode::Pu),
            Op::Pd => self.byte(Opcode::Pd),
            Op::IAdd => self.byte(Opcode::IAdd),
            Op::ISub => self.byte(Opcode::ISub),
            Op::IMul => self.byte(Opcode::IMul),
            Op::IDiv => self.byte(Opcode::IDiv),
            Op::IConst(0) => self.byte(Opcode::IConst0),
            Op::IConst(1) => self.byte(Opcode::IConst1),
            Op::IConst(45) => self.byte(Opcode::IConst45),
            Op::IConst(90) => self.byte(Opcode::IConst90),
            Op::IConst(value) => self.wide(Opcode::IConst, value),
            Op::ILoad(0) => self.byte(Opcode::ILoad0),
            Op::ILoad(1) => self.byte(Opcode::ILoad1),
            Op::ILoad(2) => self.byte(Opcode::ILoad2),
            Op::ILoad(slot) => self.wide(Opcode::ILoad, slot as i32),
            Op::IStore(0) => self.byte(Opcode::IStore0),
            Op::IStore(1) => self.byte(Opcode::IStore1),
            Op::IStore(2) => self.byte(Opcode::IStore2),
            Op::IStore(slot) => self.wide(Opcode::IStore, slot as i32),
            Op::GLoad(0) => self.byte(Opcode::GLoad0),
            Op::GLoad(1) => self.byte(Opcode::GLoad1),
            Op::GLoad(2) => self.byte(Opcode::GLoad2),
            Op::GLoad(slot) => self.wide(Opcode::GLoad, slot as i32),
            Op::GStore(0) => self.byte(Opcode::GStore0),
            Op::GStore(1) => self.byte(Opcode::GStore1),
            Op::GStore(2) => self.byte(Opcode::GStore2),
            Op::GStore(slot) => self.wide(Opcode::GStore, slot as i32),
            Op::ILt => self.byte(Opcode::ILt),
            Op::ILe => self.byte(Opcode::ILe),
            Op::IGt => self.byte(Opcode::IGt),
            Op::IGe => self.byte(Opcode::IGe),
            Op::IEq => self.byte(Opcode::IEq),
            Op::INe => self.byte(Opcode::INe),
            Op::Call(id) => self.wide(Opcode::Call, id as i32),
            Op::Ret => self.byte(Opcode::Ret),
            Op::Stop => self.byte(Opcode::Stop),
            Op::Br(target) => self.wide(Opcode::Br, target as i32),
            Op::Brt(target) => self.wide(Opcode::Brt, target as i32),
            Op::Brf(target) => self.wide(Opcode::Brf, target as i32),
        }
    }

    /// Rewrites the immediate of a branch emitted earlier at `at`
    /// (the offset returned by [`here`](Self::here) just before the
    /// branch was emitted). Used to close forward branches.
    pub fn patch_branch(&mut self, at: u32, target: u32) -> Result<(), BuildError> {
        let at = at as usize;
        let is_branch = matches!(
            self.function.code.get(at).copied().map(Opcode::try_from),
            Some(Ok(Opcode::Br)) | Some(Ok(Opcode::Brt)) | Some(Ok(Opcode::Brf))
        );
        if !is_branch || at + 5 > self.function.code.len() {
            return Err(BuildError::BadPatchOffset(at as u32));
        }
        self.function.code[at + 1..at + 5].copy_from_slice(&(target as i32).to_be_bytes());
        Ok(())
    }

    pub fn finish(mut self) -> ProgramBuilder {
        // Capacity was checked when the function was started.
        let _ = self.program.program.functions.push(self.function);
        self.program
    }

    fn byte(&mut self, opcode: Opcode) -> Result<(), BuildError> {
        self.function
            .code
            .push(opcode.into())
            .map_err(|_| BuildError::CodeTooLong)
    }

    fn wide(&mut self, opcode: Opcode, immediate: i32) -> Result<(), BuildError> {
        if self.function.code.len() + 5 > MAX_FUNC_LEN {
            return Err(BuildError::CodeTooLong);
        }
        self.byte(opcode)?;
        self.function
            .code
            .extend_from_slice(&immediate.to_be_bytes())
            .map_err(|_| BuildError::CodeTooLong)
    }
}
