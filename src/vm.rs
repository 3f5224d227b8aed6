//! VM state container (spec §4.3) and execution engine (spec §4.4).
//!
//! The engine runs a single fetch-decode-execute loop: fetch the opcode at
//! `ip`, verify bounds, enforce stack/frame preconditions, perform the
//! effect, advance `ip` (unless the opcode assigns it directly), repeat
//! until `Halt` or a fault. No cross-instruction effect is ever partially
//! committed: every check that can fail runs before the corresponding
//! mutation (spec §4.4 "Fault model").

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use log::{error, info, trace};

use crate::error::{VmError, VmResult};
use crate::opcode::Opcode;

pub const STACK_CAPACITY: usize = 1024;
pub const CALL_STACK_CAPACITY: usize = 64;
pub const LOCALS_PER_FRAME: usize = 256;

/// A single stack cell: all arithmetic, comparison, and I/O operate on
/// this type. Spec.md fixes the semantics as signed 32-bit wrapping.
pub type Cell = i32;

/// One activation record: locals, saved return address, saved evaluation
/// stack pointer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub locals: [Cell; LOCALS_PER_FRAME],
    pub return_address: usize,
    pub saved_sp: usize,
}

impl Frame {
    fn new(return_address: usize, saved_sp: usize) -> Self {
        Frame {
            locals: [0; LOCALS_PER_FRAME],
            return_address,
            saved_sp,
        }
    }
}

/// The engine's externally observable state machine (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ready,
    Running,
    Halted,
    Faulted(VmError),
}

/// A snapshot of engine-visible state taken at the moment of a fault, for
/// host/test diagnostics (spec §7: "retained in its terminal Faulted state
/// so that the host may inspect IP, SP, CSP, and the top of the
/// evaluation stack").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub ip: usize,
    pub sp: usize,
    pub csp: usize,
    pub top_of_stack: Option<Cell>,
}

/// The virtual machine: owns the evaluation stack, the call-frame stack,
/// the code buffer, the instruction pointer, and the last-error slot.
pub struct Vm<W: Write = std::io::Stdout> {
    stack: Vec<Cell>,
    sp: usize,
    frames: Vec<Frame>,
    csp: usize,
    code: Vec<u8>,
    ip: usize,
    status: Status,
    last_error: Option<VmError>,
    out: W,
}

impl Vm<std::io::Stdout> {
    /// Creates an empty VM writing `PRINT` output to standard output.
    pub fn new() -> Self {
        Vm::with_writer(std::io::stdout())
    }
}

impl Default for Vm<std::io::Stdout> {
    fn default() -> Self {
        Vm::new()
    }
}

impl<W: Write> Vm<W> {
    /// Creates an empty VM (spec §4.3 "initialize"): an empty evaluation
    /// stack, a zeroed root frame, CSP = 1, SP = 0, IP = 0, no code, no
    /// error, writing `PRINT` output to `out`.
    pub fn with_writer(out: W) -> Self {
        Vm {
            stack: Vec::with_capacity(STACK_CAPACITY),
            sp: 0,
            frames: vec![Frame::new(0, 0)],
            csp: 1,
            code: Vec::new(),
            ip: 0,
            status: Status::Ready,
            last_error: None,
            out,
        }
    }

    pub fn status(&self) -> Status {
        self.status.clone()
    }

    pub fn last_error(&self) -> Option<&VmError> {
        self.last_error.as_ref()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn csp(&self) -> usize {
        self.csp
    }

    /// Access to the underlying `PRINT` sink, primarily useful in tests
    /// that run a `Vm<Vec<u8>>` and assert on captured output.
    pub fn writer(&self) -> &W {
        &self.out
    }

    pub fn diagnostics(&self) -> FaultSnapshot {
        FaultSnapshot {
            ip: self.ip,
            sp: self.sp,
            csp: self.csp,
            top_of_stack: self.sp.checked_sub(1).and_then(|i| self.stack.get(i)).copied(),
        }
    }

    /// Loads a program into the VM (spec §4.3 "load program"). Copies
    /// `code` into an owned buffer, replacing any prior code, and sets
    /// IP to `entry_point`. The canonical reload behaviour resets SP and
    /// CSP as well, matching a fresh program launch.
    pub fn load_program(&mut self, code: &[u8], entry_point: u32) -> VmResult<()> {
        if code.is_empty() {
            return Err(VmError::NullPointer);
        }
        if entry_point as usize >= code.len() {
            return Err(VmError::InvalidOperand);
        }

        if !self.code.is_empty() {
            crate::image::warn_on_replace(self.code.len());
        }

        self.code = code.to_vec();
        self.ip = entry_point as usize;
        self.sp = 0;
        self.csp = 1;
        self.frames.truncate(1);
        self.frames[0] = Frame::new(0, 0);
        self.status = Status::Ready;
        self.last_error = None;
        Ok(())
    }

    /// Frees the code buffer and evaluation stack (spec §4.3 "release").
    /// Idempotent on an already-released VM.
    pub fn release(&mut self) {
        self.code.clear();
        self.code.shrink_to_fit();
        self.stack.clear();
        self.stack.shrink_to_fit();
        self.sp = 0;
        self.csp = 1;
        self.frames.truncate(1);
        self.ip = 0;
        self.status = Status::Ready;
    }

    fn frame(&self) -> &Frame {
        &self.frames[self.csp - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let csp = self.csp;
        &mut self.frames[csp - 1]
    }

    fn push(&mut self, value: Cell) -> VmResult<()> {
        if self.sp >= STACK_CAPACITY {
            return Err(VmError::StackOverflow);
        }
        if self.sp == self.stack.len() {
            self.stack.push(value);
        } else {
            self.stack[self.sp] = value;
        }
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Cell> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    /// Pops two cells for a binary operator, checking depth up front so a
    /// one-cell stack faults with `sp`/`top_of_stack` still reflecting the
    /// pre-effect state (neither `pop` has run yet).
    fn pop2(&mut self) -> VmResult<(Cell, Cell)> {
        if self.sp < 2 {
            return Err(VmError::StackUnderflow);
        }
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn fault(&mut self, err: VmError) -> VmError {
        error!("fault at ip={}: {err} (sp={}, csp={})", self.ip, self.sp, self.csp);
        self.status = Status::Faulted(err.clone());
        self.last_error = Some(err.clone());
        let _ = self.out.flush();
        err
    }

    /// Runs the fetch-decode-execute loop to completion: either `Halt` is
    /// observed (`Ok(())`) or a fault aborts it (`Err`).
    pub fn run(&mut self) -> VmResult<()> {
        self.status = Status::Running;
        loop {
            match self.step() {
                Ok(true) => continue,
                Ok(false) => {
                    info!("halted at ip={}", self.ip);
                    self.status = Status::Halted;
                    let _ = self.out.flush();
                    return Ok(());
                }
                Err(err) => return Err(self.fault(err)),
            }
        }
    }

    /// Executes exactly one instruction. Returns `Ok(true)` to continue,
    /// `Ok(false)` on `HALT`, or `Err` on fault. `ip`/`sp`/`csp` are left
    /// unchanged (reflecting pre-effect state) for any mutation not yet
    /// committed at the point of failure.
    pub fn step(&mut self) -> VmResult<bool> {
        let code_size = self.code.len();

        if self.ip >= code_size {
            return Err(VmError::InvalidOperand);
        }
        let raw_opcode = self.code[self.ip];
        let opcode = Opcode::decode(raw_opcode).ok_or(VmError::IllegalInstruction)?;
        let len = opcode.len();

        if self.ip + len > code_size {
            return Err(VmError::InvalidOperand);
        }

        trace!("ip={} op={}", self.ip, opcode.mnemonic());

        match opcode {
            Opcode::Push => {
                let imm = self.read_i32(self.ip + 1);
                self.push(imm)?;
                self.ip += len;
            }
            Opcode::Pop => {
                self.pop()?;
                self.ip += len;
            }
            Opcode::Load => {
                let idx = self.read_local_index(self.ip + 1)?;
                let value = self.frame().locals[idx];
                self.push(value)?;
                self.ip += len;
            }
            Opcode::Store => {
                let idx = self.read_local_index(self.ip + 1)?;
                let value = self.pop()?;
                self.frame_mut().locals[idx] = value;
                self.ip += len;
            }
            Opcode::Add => self.binary_arith(len, Cell::wrapping_add)?,
            Opcode::Sub => self.binary_arith(len, Cell::wrapping_sub)?,
            Opcode::Mul => self.binary_arith(len, Cell::wrapping_mul)?,
            Opcode::Div => {
                let (a, b) = self.pop2()?;
                if b == 0 {
                    return Err(VmError::DivideByZero);
                }
                self.push(a.wrapping_div(b))?;
                self.ip += len;
            }
            Opcode::CmpEq => self.compare(len, |a, b| a == b)?,
            Opcode::CmpNeq => self.compare(len, |a, b| a != b)?,
            Opcode::CmpLt => self.compare(len, |a, b| a < b)?,
            Opcode::CmpLte => self.compare(len, |a, b| a <= b)?,
            Opcode::CmpGt => self.compare(len, |a, b| a > b)?,
            Opcode::CmpGte => self.compare(len, |a, b| a >= b)?,
            Opcode::Jmp => {
                let addr = self.read_address(self.ip + 1);
                self.ip = addr;
            }
            Opcode::Jmpz => {
                let addr = self.read_address(self.ip + 1);
                let a = self.pop()?;
                self.ip = if a == 0 { addr } else { self.ip + len };
            }
            Opcode::Call => {
                let addr = self.read_address(self.ip + 1);
                if self.csp >= CALL_STACK_CAPACITY {
                    return Err(VmError::StackOverflow);
                }
                let new_frame = Frame::new(self.ip + len, self.sp);
                if self.csp == self.frames.len() {
                    self.frames.push(new_frame);
                } else {
                    self.frames[self.csp] = new_frame;
                }
                self.csp += 1;
                self.ip = addr;
            }
            Opcode::Ret => {
                if self.csp == 1 {
                    return Err(VmError::StackUnderflow);
                }
                let frame = self.frames[self.csp - 1].clone();
                self.csp -= 1;
                self.sp = frame.saved_sp;
                self.ip = frame.return_address;
            }
            Opcode::Print => {
                let value = self.pop()?;
                writeln!(self.out, "{value}").map_err(|_| VmError::Unknown)?;
                self.ip += len;
            }
            Opcode::Halt => return Ok(false),
        }

        Ok(true)
    }

    fn binary_arith(&mut self, len: usize, op: fn(Cell, Cell) -> Cell) -> VmResult<()> {
        let (a, b) = self.pop2()?;
        self.push(op(a, b))?;
        self.ip += len;
        Ok(())
    }

    fn compare(&mut self, len: usize, op: fn(Cell, Cell) -> bool) -> VmResult<()> {
        let (a, b) = self.pop2()?;
        self.push(op(a, b) as Cell)?;
        self.ip += len;
        Ok(())
    }

    fn read_i32(&self, at: usize) -> Cell {
        LittleEndian::read_i32(&self.code[at..at + 4])
    }

    fn read_address(&self, at: usize) -> usize {
        LittleEndian::read_u32(&self.code[at..at + 4]) as usize
    }

    fn read_local_index(&self, at: usize) -> VmResult<usize> {
        let idx = self.code[at] as usize;
        if idx >= LOCALS_PER_FRAME {
            return Err(VmError::InvalidOperand);
        }
        Ok(idx)
    }
}
