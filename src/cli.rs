//! The external CLI collaborator (spec §6). Out of scope for the core's
//! correctness, but still the crate's externally visible entry point, so
//! it is built like the rest of the pack builds a CLI: `clap`'s derive
//! macros, grounded in
//! `examples/MystenLabs-sui/crates/remora/src/bin/test_remora.rs`.

use std::path::PathBuf;

use clap::Parser;

/// NanoVM: loads and executes a bytecode image.
#[derive(Debug, Parser)]
#[command(name = "nanovm", about = "A small stack-based bytecode virtual machine")]
pub struct Args {
    /// Path to the bytecode image (positional form).
    pub image: Option<PathBuf>,

    /// Path to the bytecode image.
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Optional log sink; when set, logs are written here instead of stderr.
    #[arg(short = 'l', long = "log")]
    pub log: Option<PathBuf>,
}

impl Args {
    /// Resolves the image path from either the positional argument or `-f`,
    /// preferring `-f` when both are given.
    pub fn image_path(&self) -> Option<&PathBuf> {
        self.file.as_ref().or(self.image.as_ref())
    }
}
