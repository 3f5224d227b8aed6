//! NanoVM: a stack-based bytecode virtual machine for a small,
//! untyped-integer instruction set.
//!
//! See `SPEC_FULL.md` for the full component breakdown. The public API
//! surface mirrors the data flow: [`image::load_image`] validates a binary
//! program image and hands out a code segment and entry point;
//! [`vm::Vm`] owns the evaluation stack, call frames, and the
//! fetch-decode-execute loop that runs it to [`vm::Status::Halted`] or a
//! fault.

pub mod cli;
pub mod error;
pub mod image;
pub mod opcode;
pub mod vm;

pub use error::{VmError, VmResult};
pub use image::{load_image, LoadedImage};
pub use vm::Vm;
