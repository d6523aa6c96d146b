//! Dependence report file
//!
//! Plain text, one dependence per line, consumed by the downstream
//! parallelization passes:
//!
//! ```text
//! <loop> 0 0 0 0 0                      header
//! <loop> <src> <dst> <dst_bare> <cross> 1
//! ```
//!
//! Lines after the header are in canonical key order, so two runs observing
//! the same dependences produce identical files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::analysis::DependenceKey;
use crate::domain::{ExportError, LoopId};
use crate::profiling::SessionResult;

/// Appended to the report name when the run ended with an error
pub const PARTIAL_SUFFIX: &str = ".partial";

/// `<dir>/deplog-<loop>.txt`
#[must_use]
pub fn report_path(dir: &Path, loop_id: LoopId) -> PathBuf {
    dir.join(format!("deplog-{}.txt", loop_id.0))
}

/// Write the header and one line per key
///
/// # Errors
/// Returns an error if writing fails
pub fn write_report<W: Write>(out: &mut W, loop_id: LoopId, keys: &[DependenceKey]) -> std::io::Result<()> {
    let loop_id = loop_id.0;
    writeln!(out, "{loop_id} 0 0 0 0 0")?;
    for key in keys {
        writeln!(out, "{loop_id} {key} 1")?;
    }
    out.flush()
}

/// Write the final report of a finished session into `dir`
///
/// # Errors
/// Returns an error if the file cannot be created or written
pub fn write_report_file(dir: &Path, result: &SessionResult) -> Result<PathBuf, ExportError> {
    let path = report_path(dir, result.loop_id);
    write_to(&path, result.loop_id, &result.dependences)?;
    Ok(path)
}

/// Write what an aborted session collected, next to where the final report
/// would have gone
///
/// # Errors
/// Returns an error if the file cannot be created or written
pub fn write_partial_report_file(
    dir: &Path,
    loop_id: LoopId,
    keys: &[DependenceKey],
) -> Result<PathBuf, ExportError> {
    let mut name = report_path(dir, loop_id).into_os_string();
    name.push(PARTIAL_SUFFIX);
    let path = PathBuf::from(name);
    write_to(&path, loop_id, keys)?;
    Ok(path)
}

fn write_to(path: &Path, loop_id: LoopId, keys: &[DependenceKey]) -> Result<(), ExportError> {
    let wrap = |source| ExportError::WriteFailed { path: path.to_path_buf(), source };
    let file = File::create(path).map_err(wrap)?;
    let mut out = BufWriter::new(file);
    write_report(&mut out, loop_id, keys).map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrId;

    fn key(src: u32, dst: u32, bare: u32, cross: bool) -> DependenceKey {
        DependenceKey::new(InstrId(src), InstrId(dst), InstrId(bare), cross)
    }

    #[test]
    fn test_report_lines() {
        let mut out = Vec::new();
        write_report(&mut out, LoopId(7), &[key(1, 2, 2, false), key(3, 4, 5, true)]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "7 0 0 0 0 0\n7 1 2 2 0 1\n7 3 4 5 1 1\n");
    }

    #[test]
    fn test_empty_report_has_header() {
        let mut out = Vec::new();
        write_report(&mut out, LoopId(1), &[]).unwrap();
        assert_eq!(out, b"1 0 0 0 0 0\n");
    }

    #[test]
    fn test_paths() {
        let dir = Path::new("/tmp/out");
        assert_eq!(report_path(dir, LoopId(12)), Path::new("/tmp/out/deplog-12.txt"));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_partial_report_file(dir.path(), LoopId(2), &[key(1, 1, 1, true)]).unwrap();
        assert_eq!(path, dir.path().join("deplog-2.txt.partial"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "2 0 0 0 0 0\n2 1 1 1 1 1\n");
    }

    #[test]
    fn test_unwritable_directory() {
        let err = write_partial_report_file(Path::new("/nonexistent/dir"), LoopId(1), &[]).unwrap_err();
        assert!(matches!(err, ExportError::WriteFailed { .. }));
        assert!(err.to_string().contains("/nonexistent/dir/deplog-1.txt.partial"));
    }
}
