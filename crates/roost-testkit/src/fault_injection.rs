//! Simulated crash and disk damage for index directories.
//!
//! Each fault reproduces what an interrupted write or a bad sector leaves
//! behind, so recovery paths can be exercised without killing a process.

use roost_hnsw::{INSERT_LOG_FILE, SNAPSHOT_FILE};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// A way of damaging `<index dir>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFault {
    /// Flip one byte in the middle of the snapshot.
    FlipSnapshotByte,
    /// Cut the last `n` bytes off the insert log, as a crash mid-append does.
    TruncateLog(u64),
    /// Append bytes that do not form a valid frame.
    GarbageLogTail,
    /// Empty the insert log, losing every insert since the last snapshot.
    ClearLog,
    /// Remove the whole index directory.
    DropIndex,
}

impl IndexFault {
    pub fn inject(self, index_dir: &Path) -> io::Result<()> {
        match self {
            IndexFault::FlipSnapshotByte => {
                let path = index_dir.join(SNAPSHOT_FILE);
                let mut bytes = fs::read(&path)?;
                if bytes.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "empty snapshot"));
                }
                let mid = bytes.len() / 2;
                bytes[mid] ^= 0xff;
                fs::write(path, bytes)
            }
            IndexFault::TruncateLog(n) => {
                let file = OpenOptions::new()
                    .write(true)
                    .open(index_dir.join(INSERT_LOG_FILE))?;
                let len = file.metadata()?.len();
                file.set_len(len.saturating_sub(n))
            }
            IndexFault::GarbageLogTail => {
                let mut file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(index_dir.join(INSERT_LOG_FILE))?;
                file.write_all(&[0x10, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef])
            }
            IndexFault::ClearLog => OpenOptions::new()
                .write(true)
                .open(index_dir.join(INSERT_LOG_FILE))?
                .set_len(0),
            IndexFault::DropIndex => fs::remove_dir_all(index_dir),
        }
    }
}

/// Size of the insert log, 0 when missing.
pub fn log_len(index_dir: &Path) -> u64 {
    fs::metadata(index_dir.join(INSERT_LOG_FILE))
        .map(|m| m.len())
        .unwrap_or(0)
}
