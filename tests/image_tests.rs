//! Loader boundary behaviours (spec §8).

use nanovm::load_image;
use nanovm::VmError;

const MAGIC: [u8; 4] = *b"NBVM";

fn header(code_size: u32, entry_point: u32) -> Vec<u8> {
    let mut h = Vec::with_capacity(16);
    h.extend_from_slice(&MAGIC);
    h.extend_from_slice(&1u16.to_le_bytes());
    h.extend_from_slice(&0u16.to_le_bytes());
    h.extend_from_slice(&code_size.to_le_bytes());
    h.extend_from_slice(&entry_point.to_le_bytes());
    h
}

fn write_temp(bytes: &[u8]) -> tempfile_like::TempFile {
    tempfile_like::TempFile::new(bytes)
}

/// A tiny self-contained temp-file helper, since this crate does not
/// depend on `tempfile` for the single-use case of writing fixture
/// images to disk.
mod tempfile_like {
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    pub struct TempFile {
        pub path: PathBuf,
    }

    impl TempFile {
        pub fn new(bytes: &[u8]) -> Self {
            let id = COUNTER.fetch_add(1, Ordering::Relaxed);
            let mut path = std::env::temp_dir();
            path.push(format!("nanovm-test-{}-{id}", std::process::id()));
            let mut file = fs::File::create(&path).unwrap();
            file.write_all(bytes).unwrap();
            TempFile { path }
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[test]
fn missing_file_is_file_not_found() {
    let err = load_image("/nonexistent/path/to/nanovm-image.bin").unwrap_err();
    assert_eq!(err, VmError::FileNotFound);
}

#[test]
fn well_formed_minimal_image_loads() {
    let mut bytes = header(1, 0);
    bytes.push(0x13); // HALT
    let tmp = write_temp(&bytes);
    let image = load_image(&tmp.path).unwrap();
    assert_eq!(image.code, vec![0x13]);
    assert_eq!(image.entry_point, 0);
}

#[test]
fn file_of_15_bytes_is_invalid_format() {
    let tmp = write_temp(&[0u8; 15]);
    assert_eq!(load_image(&tmp.path).unwrap_err(), VmError::InvalidFormat);
}

#[test]
fn file_over_10_mib_is_too_large() {
    let bytes = vec![0u8; 10 * 1024 * 1024 + 1];
    let tmp = write_temp(&bytes);
    assert_eq!(load_image(&tmp.path).unwrap_err(), VmError::FileTooLarge);
}

#[test]
fn altered_magic_is_invalid_format() {
    for i in 0..4 {
        let mut bytes = header(1, 0);
        bytes.push(0x13);
        bytes[i] ^= 0xFF;
        let tmp = write_temp(&bytes);
        assert_eq!(load_image(&tmp.path).unwrap_err(), VmError::InvalidFormat, "position {i}");
    }
}

#[test]
fn wrong_version_is_invalid_format() {
    let mut bytes = header(1, 0);
    bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
    bytes.push(0x13);
    let tmp = write_temp(&bytes);
    assert_eq!(load_image(&tmp.path).unwrap_err(), VmError::InvalidFormat);
}

#[test]
fn entry_point_equal_to_code_size_is_invalid_format() {
    let mut bytes = header(1, 1);
    bytes.push(0x13);
    let tmp = write_temp(&bytes);
    assert_eq!(load_image(&tmp.path).unwrap_err(), VmError::InvalidFormat);
}

#[test]
fn loader_round_trip_preserves_header_bytes_and_code_size() {
    let mut bytes = header(3, 1);
    bytes.extend_from_slice(&[0x13, 0x13, 0x13]);
    let tmp = write_temp(&bytes);
    let image = load_image(&tmp.path).unwrap();
    assert_eq!(image.code.len(), 3);
    assert_eq!(&bytes[0..16], &header(3, 1)[..]);
}
