use crate::bits;
use crate::error::{Result, ZoonError};
use crate::runner::{RunResult, Runner};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

/// Permission bits given to a materialized variant: `rwxr-xr-x`.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// An executable treated as a living thing: a byte sequence that can be
/// point-mutated, written out, and run.
///
/// A `Zoon` is never changed in place. Every mutating operation returns a new,
/// independently owned `Zoon` and leaves the receiver untouched, so a single
/// parent can be shared read-only across threads that derive variants from it.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Zoon {
    bytes: Vec<u8>,
}

impl Zoon {
    /// Reads the whole content of a regular file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ZoonError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)
            .map_err(|e| ZoonError::io(format!("Failed to read {}", path.display()), e))?;
        debug!(path = %path.display(), len = bytes.len(), "loaded zoon from file");
        Ok(Self { bytes })
    }

    /// Decodes a bit-literal such as `"01100001"` (one byte, `b'a'`).
    pub fn from_bits(literal: &str) -> Result<Self> {
        Ok(Self {
            bytes: bits::to_bytes(literal)?,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Length in bits, the valid range for [`Zoon::mutate`].
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Renders the content as a bit-literal accepted by [`Zoon::from_bits`].
    pub fn to_bits(&self) -> String {
        bits::to_bits(&self.bytes)
    }

    /// Hex MD5 of the content.
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(&self.bytes))
    }

    /// Flips the single bit at `position`.
    ///
    /// Bits are numbered from the most significant bit of byte 0, so
    /// `mutate(0)` on `0x61` yields `0xE1`. Applying the same mutation twice
    /// restores the original.
    pub fn mutate(&self, position: usize) -> Result<Self> {
        if position >= self.bit_len() {
            return Err(ZoonError::OutOfRange {
                what: "bit position",
                index: position,
                len: self.bit_len(),
            });
        }
        let (byte, bit) = bits::locate(position);
        let mut mutant = self.clone();
        mutant.bytes[byte] = bits::toggle_bit_in_byte(bit, mutant.bytes[byte]);
        Ok(mutant)
    }

    /// Removes the half-open byte range `[start, stop)`.
    pub fn delete(&self, start: usize, stop: usize) -> Result<Self> {
        self.check_range(start, stop)?;
        let mut bytes = Vec::with_capacity(self.len() - (stop - start));
        bytes.extend_from_slice(&self.bytes[..start]);
        bytes.extend_from_slice(&self.bytes[stop..]);
        Ok(Self { bytes })
    }

    /// Inserts the bytes of `insertion` before byte `position`.
    pub fn insert(&self, position: usize, insertion: &Zoon) -> Result<Self> {
        if position > self.len() {
            return Err(ZoonError::OutOfRange {
                what: "insert position",
                index: position,
                len: self.len(),
            });
        }
        let mut bytes = Vec::with_capacity(self.len() + insertion.len());
        bytes.extend_from_slice(&self.bytes[..position]);
        bytes.extend_from_slice(&insertion.bytes);
        bytes.extend_from_slice(&self.bytes[position..]);
        Ok(Self { bytes })
    }

    /// Inverts every bit of the bytes in `[start, stop)`.
    pub fn invert(&self, start: usize, stop: usize) -> Result<Self> {
        self.check_range(start, stop)?;
        let mut mutant = self.clone();
        for byte in &mut mutant.bytes[start..stop] {
            *byte = !*byte;
        }
        Ok(mutant)
    }

    /// Single-point crossover: `self[..position]` followed by `other[position..]`.
    pub fn cross(&self, other: &Zoon, position: usize) -> Result<Self> {
        let limit = self.len().min(other.len());
        if position > limit {
            return Err(ZoonError::OutOfRange {
                what: "crossover position",
                index: position,
                len: limit,
            });
        }
        let mut bytes = Vec::with_capacity(other.len());
        bytes.extend_from_slice(&self.bytes[..position]);
        bytes.extend_from_slice(&other.bytes[position..]);
        Ok(Self { bytes })
    }

    fn check_range(&self, start: usize, stop: usize) -> Result<()> {
        if stop > self.len() {
            return Err(ZoonError::OutOfRange {
                what: "range end",
                index: stop,
                len: self.len(),
            });
        }
        if start > stop {
            return Err(ZoonError::OutOfRange {
                what: "range start",
                index: start,
                len: stop,
            });
        }
        Ok(())
    }

    /// Writes the content to `path`, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        fs::write(path, &self.bytes)
            .map_err(|e| ZoonError::io(format!("Failed to write {}", path.display()), e))?;
        Ok(path.to_path_buf())
    }

    /// Writes the zoon to `path`, marks it executable and runs it with `args`
    /// appended, using the default runner. `path` is taken literally; only
    /// `args` is split into words.
    pub fn run(&self, path: impl AsRef<Path>, args: &str, timeout: Duration) -> Result<RunResult> {
        self.run_with(&Runner::default(), path, args, timeout)
    }

    /// As [`Zoon::run`], using the given runner.
    #[instrument(skip(self, runner, path), fields(path = %path.as_ref().display(), digest = %self.digest()))]
    pub fn run_with(
        &self,
        runner: &Runner,
        path: impl AsRef<Path>,
        args: &str,
        timeout: Duration,
    ) -> Result<RunResult> {
        if timeout.is_zero() {
            return Err(ZoonError::InvalidArgument(
                "timeout must be greater than zero".to_string(),
            ));
        }
        let path = self.write(path)?;
        make_executable(&path)?;
        runner.run_program(&path, args, timeout)
    }

    /// Mutates bit `position`, then runs the mutant as `dir/<position>`.
    ///
    /// Keying the file name by position lets callers run many variants of
    /// the same parent concurrently in one directory.
    pub fn mutate_and_run(
        &self,
        position: usize,
        dir: impl AsRef<Path>,
        args: &str,
        timeout: Duration,
    ) -> Result<RunResult> {
        self.mutate_and_run_with(&Runner::default(), position, dir, args, timeout)
    }

    pub fn mutate_and_run_with(
        &self,
        runner: &Runner,
        position: usize,
        dir: impl AsRef<Path>,
        args: &str,
        timeout: Duration,
    ) -> Result<RunResult> {
        let mutant = self.mutate(position)?;
        let path = dir.as_ref().join(position.to_string());
        mutant.run_with(runner, path, args, timeout)
    }
}

impl From<Vec<u8>> for Zoon {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl AsRef<[u8]> for Zoon {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for Zoon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zoon({} bytes, md5 {})", self.len(), self.digest())
    }
}

impl fmt::Debug for Zoon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zoon")
            .field("len", &self.len())
            .field("digest", &self.digest())
            .finish()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_MODE))
        .map_err(|e| ZoonError::io(format!("Failed to chmod {}", path.display()), e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
