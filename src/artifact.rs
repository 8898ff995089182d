//! The append-only output artifact: one `<globalId>,<payload>` line per record,
//! no header.
//!
//! A run that was interrupted can leave a last line without its newline.
//! Readers here skip such a torn tail instead of failing on it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::ArtifactError;
use crate::graph6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedRecord {
    pub global_id: u64,
    pub payload: String,
}

/// Id range covered by a verified artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub records: u64,
    pub first_id: Option<u64>,
    pub next_id: u64,
}

/// Append one record. Returns the number of bytes written.
pub fn write_record<W: Write>(out: &mut W, global_id: u64, payload: &[u8]) -> io::Result<u64> {
    let prefix = format!("{global_id},");
    out.write_all(prefix.as_bytes())?;
    out.write_all(payload)?;
    out.write_all(b"\n")?;
    Ok((prefix.len() + payload.len() + 1) as u64)
}

/// Open an artifact for appending, creating it (and its directory) if needed.
pub fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Truncate (or create) an artifact so a fresh run starts from id 0.
pub fn reset(path: &Path) -> Result<(), ArtifactError> {
    open_append(path)
        .and_then(|file| file.set_len(0))
        .map_err(|source| io_error(path, source))
}

pub fn parse_line(line: &str) -> Result<EnumeratedRecord, String> {
    let (id, payload) = line
        .split_once(',')
        .ok_or_else(|| "missing ',' separator".to_string())?;
    let global_id = id
        .parse::<u64>()
        .map_err(|err| format!("bad id {id:?}: {err}"))?;
    if payload.is_empty() {
        return Err("empty payload".to_string());
    }
    Ok(EnumeratedRecord {
        global_id,
        payload: payload.to_string(),
    })
}

/// Visit every complete record in file order. Returns the byte length of the
/// complete lines, which is the whole file unless the tail is torn.
///
/// Payloads must be graph6, all for the same vertex count.
fn for_each_record<F>(path: &Path, mut visit: F) -> Result<u64, ArtifactError>
where
    F: FnMut(u64, EnumeratedRecord) -> Result<(), ArtifactError>,
{
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0u64;
    let mut complete = 0u64;
    let mut vertex_count = None;
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| io_error(path, source))?;
        if read == 0 {
            return Ok(complete);
        }
        line_no += 1;
        if buf.last() != Some(&b'\n') {
            warn!(
                path = %path.display(),
                line = line_no,
                bytes = buf.len(),
                "ignoring torn trailing line"
            );
            return Ok(complete);
        }
        complete += read as u64;
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let malformed = |reason: String| ArtifactError::Malformed {
            path: path.to_path_buf(),
            line: line_no,
            reason,
        };
        let text = std::str::from_utf8(&buf).map_err(|err| malformed(err.to_string()))?;
        let record = parse_line(text).map_err(malformed)?;
        let payload = record.payload.as_bytes();
        let (n, _) = graph6::header(payload).map_err(|err| malformed(err.to_string()))?;
        let expected = *vertex_count.get_or_insert(n);
        graph6::validate(payload, expected).map_err(|err| malformed(err.to_string()))?;
        visit(line_no, record)?;
    }
}

/// All complete records of an artifact.
pub fn read_records(path: &Path) -> Result<Vec<EnumeratedRecord>, ArtifactError> {
    let mut records = Vec::new();
    for_each_record(path, |_, record| {
        records.push(record);
        Ok(())
    })?;
    Ok(records)
}

/// Id to continue numbering from when appending to an existing artifact:
/// one past the largest id present, or 0 when the artifact is missing or empty.
/// Read only; see [`prepare_resume`] before actually appending.
pub fn resume_start_id(path: &Path) -> Result<u64, ArtifactError> {
    scan_for_resume(path).map(|(next, _)| next)
}

/// Make an artifact safe to append to and return the id to continue from.
///
/// A torn trailing line is cut off first; otherwise the next record would be
/// glued onto it.
pub fn prepare_resume(path: &Path) -> Result<u64, ArtifactError> {
    let (next, complete) = scan_for_resume(path)?;
    if !path.exists() {
        return Ok(next);
    }
    let len = fs::metadata(path)
        .map_err(|source| io_error(path, source))?
        .len();
    if complete < len {
        warn!(
            path = %path.display(),
            dropped_bytes = len - complete,
            "truncating torn trailing line before resuming"
        );
        OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_len(complete))
            .map_err(|source| io_error(path, source))?;
    }
    Ok(next)
}

fn scan_for_resume(path: &Path) -> Result<(u64, u64), ArtifactError> {
    if !path.exists() {
        return Ok((0, 0));
    }
    let mut next = 0u64;
    let complete = for_each_record(path, |_, record| {
        next = next.max(record.global_id + 1);
        Ok(())
    })?;
    Ok((next, complete))
}

/// Check that ids are contiguous and strictly increasing from `start`.
pub fn verify(path: &Path, start: u64) -> Result<ArtifactSummary, ArtifactError> {
    let mut summary = ArtifactSummary {
        records: 0,
        first_id: None,
        next_id: start,
    };
    for_each_record(path, |line, record| {
        if record.global_id != summary.next_id {
            return Err(ArtifactError::Gap {
                path: path.to_path_buf(),
                line,
                expected: summary.next_id,
                found: record.global_id,
            });
        }
        summary.first_id.get_or_insert(record.global_id);
        summary.records += 1;
        summary.next_id += 1;
        Ok(())
    })?;
    Ok(summary)
}

fn io_error(path: &Path, source: io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_and_parse_a_record() {
        let mut out = Vec::new();
        let n = write_record(&mut out, 42, b"C~").unwrap();
        assert_eq!(out, b"42,C~\n");
        assert_eq!(n, 6);
        assert_eq!(
            parse_line("42,C~").unwrap(),
            EnumeratedRecord {
                global_id: 42,
                payload: "C~".into()
            }
        );
    }

    #[test]
    fn parse_rejects_bad_lines() {
        assert!(parse_line("C~").is_err());
        assert!(parse_line("x,C~").is_err());
        assert!(parse_line("-1,C~").is_err());
        assert!(parse_line("3,").is_err());
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("4-graphs.csv");
        fs::write(&path, "0,C?\n1,C_\n2,C").unwrap();
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(resume_start_id(&path).unwrap(), 2);
        assert_eq!(verify(&path, 0).unwrap().next_id, 2);
    }

    #[test]
    fn resuming_cuts_off_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("3-graphs.csv");
        fs::write(&path, "0,B?\n1,B_\n2,B").unwrap();
        assert_eq!(prepare_resume(&path).unwrap(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,B?\n1,B_\n");

        let mut file = open_append(&path).unwrap();
        write_record(&mut file, 2, b"Bw").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,B?\n1,B_\n2,Bw\n");
        assert_eq!(verify(&path, 0).unwrap().next_id, 3);
    }

    #[test]
    fn prepare_resume_leaves_clean_and_missing_artifacts_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("3-graphs.csv");
        assert_eq!(prepare_resume(&path).unwrap(), 0);
        assert!(!path.exists());
        fs::write(&path, "0,B?\n1,B_\n").unwrap();
        assert_eq!(prepare_resume(&path).unwrap(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,B?\n1,B_\n");
    }

    #[test]
    fn glued_record_is_not_graph6() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("3-graphs.csv");
        fs::write(&path, "0,B?\n1,B_\n2,B2,Bw\n").unwrap();
        match verify(&path, 0) {
            Err(ArtifactError::Malformed { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn records_must_share_one_vertex_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.csv");
        fs::write(&path, "0,B?\n1,C~\n").unwrap();
        assert!(matches!(
            read_records(&path),
            Err(ArtifactError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn malformed_complete_line_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "0,C?\nnot a record\n").unwrap();
        match read_records(&path) {
            Err(ArtifactError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resume_id_of_missing_or_empty_artifact_is_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("none.csv");
        assert_eq!(resume_start_id(&path).unwrap(), 0);
        reset(&path).unwrap();
        assert_eq!(resume_start_id(&path).unwrap(), 0);
    }

    #[test]
    fn verify_reports_the_first_gap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gap.csv");
        fs::write(&path, "5,C?\n6,C_\n8,Cw\n").unwrap();
        match verify(&path, 5) {
            Err(ArtifactError::Gap {
                line,
                expected,
                found,
                ..
            }) => assert_eq!((line, expected, found), (3, 7, 8)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(verify(&path, 0), Err(ArtifactError::Gap { line: 1, .. })));
    }

    #[test]
    fn reset_truncates_and_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("6-graphs.csv");
        reset(&path).unwrap();
        fs::write(&path, "0,E???\n").unwrap();
        reset(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }
}
