//! Image loader & verifier (spec §4.2): reads a binary program image from
//! disk, validates its fixed 16-byte header, and hands out an owned code
//! segment plus entry point.

use std::fs;
use std::io;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::error::{VmError, VmResult};

const HEADER_LEN: usize = 16;
const MAGIC: [u8; 4] = *b"NBVM";
const VERSION: u16 = 0x0001;
const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// The result of a successful load: an owned code segment and its entry
/// point, ready to be handed to [`crate::vm::Vm::load_program`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub code: Vec<u8>,
    pub entry_point: u32,
}

/// Reads `path` into memory and validates it as a NanoVM image.
///
/// Validation is short-circuited in the order spec.md §4.2 mandates: file
/// size floor, file size ceiling, magic, version, declared code size fits
/// the file, entry point within the code segment.
pub fn load_image(path: impl AsRef<Path>) -> VmResult<LoadedImage> {
    let path = path.as_ref();
    let bytes = read_whole_file(path)?;
    parse_image(&bytes)
}

fn read_whole_file(path: &Path) -> VmResult<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => VmError::FileNotFound,
        _ => VmError::FileRead(err.to_string()),
    })
}

/// Validates an in-memory image and strips its header, returning only the
/// trailing `code_size` bytes as the code segment. The loader retains
/// nothing: the full-file buffer is dropped once the code segment is
/// copied out.
fn parse_image(bytes: &[u8]) -> VmResult<LoadedImage> {
    if bytes.len() < HEADER_LEN {
        debug!("image too small to contain a header ({} bytes)", bytes.len());
        return Err(VmError::InvalidFormat);
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(VmError::FileTooLarge);
    }

    let magic = &bytes[0..4];
    if magic != MAGIC {
        debug!("bad magic: {magic:?}");
        return Err(VmError::InvalidFormat);
    }

    let version = LittleEndian::read_u16(&bytes[4..6]);
    if version != VERSION {
        debug!("unsupported version: {version:#06x}");
        return Err(VmError::InvalidFormat);
    }

    // offset 6..8 is reserved and ignored on read.

    let code_size = LittleEndian::read_u32(&bytes[8..12]) as usize;
    if HEADER_LEN.checked_add(code_size).filter(|&total| total <= bytes.len()).is_none() {
        debug!("declared code_size {code_size} does not fit in {} byte file", bytes.len());
        return Err(VmError::InvalidFormat);
    }

    let entry_point = LittleEndian::read_u32(&bytes[12..16]);
    if entry_point as usize >= code_size {
        debug!("entry_point {entry_point} not within code of size {code_size}");
        return Err(VmError::InvalidFormat);
    }

    let code = bytes[HEADER_LEN..HEADER_LEN + code_size].to_vec();
    Ok(LoadedImage { code, entry_point })
}

/// Logs the "replacing an already-loaded program" warning path (spec §7's
/// only non-fatal path).
pub fn warn_on_replace(previous_len: usize) {
    warn!("replacing already-loaded program ({previous_len} bytes discarded)");
}
