//! Text sources: bags of lines read lazily from files.

use std::fs::{self, File};
use std::io::prelude::*;
use std::io::{self, BufReader, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use sack::deferred::{batch_try_apply, Deferred};
use sack::TaskFailure;

use crate::collection::bag::Bag;
use crate::error::BagError;

/// How the bytes of a text file are encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// Chosen from the file extension
    #[default]
    Auto,
    /// Plain text
    None,
    /// Gzip, possibly multi-member
    Gzip,
    /// Snappy frame format
    Snappy,
}

impl Compression {
    /// Resolves `Auto` for a concrete path: `.gz` is gzip, `.sz` and `.snappy`
    /// are snappy, anything else is read as is.
    pub fn for_path(self, path: &Path) -> Compression {
        match self {
            Compression::Auto => match path.extension().and_then(|e| e.to_str()) {
                Some("gz") => Compression::Gzip,
                Some("sz") | Some("snappy") => Compression::Snappy,
                _ => Compression::None
            },
            other => other
        }
    }
}

// Undecodable bytes fail the same way on every attempt; everything else may be
// a passing condition of the file system.
fn io_failure(e: io::Error) -> TaskFailure {
    if e.kind() == ErrorKind::InvalidData {
        TaskFailure::fatal(e)
    } else {
        TaskFailure::transient(e)
    }
}

fn open(path: &Path, compression: Compression) -> io::Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    Ok(match compression.for_path(path) {
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(f))),
        Compression::Snappy => Box::new(BufReader::new(snap::read::FrameDecoder::new(f))),
        _ => Box::new(BufReader::new(f))
    })
}

fn read_files(paths: &[PathBuf], compression: Compression) -> Result<Vec<String>, TaskFailure> {
    let mut lines = Vec::new();
    for path in paths {
        trace!("Reading {}", path.display());
        let reader = open(path, compression).map_err(io_failure)?;
        for line in reader.lines() {
            lines.push(line.map_err(io_failure)?);
        }
    }
    Ok(lines)
}

/// Reads every file matching the glob `pattern` as a Bag of lines, with line
/// terminators stripped.  Matches are sorted and grouped `files_per_partition`
/// to a partition.  Fails with `SourceNotFound` when nothing matches; the files
/// themselves are only opened once the Bag is run.
/// ```rust
///   use sack_collection::BagError;
///   use sack_collection::sources::{read_text, Compression};
///
///   match read_text("/no/such/dir/*.txt", 1, Compression::Auto) {
///       Err(BagError::SourceNotFound { pattern }) => assert_eq!(pattern, "/no/such/dir/*.txt"),
///       _ => panic!("expected no matches"),
///   }
/// ```
pub fn read_text(pattern: &str, files_per_partition: usize, compression: Compression) -> Result<Bag<String>, BagError> {
    let mut paths = glob::glob(pattern)?
        .collect::<Result<Vec<PathBuf>, _>>()?;
    paths.retain(|p| p.is_file());
    if paths.is_empty() {
        return Err(BagError::SourceNotFound { pattern: pattern.to_owned() });
    }
    paths.sort();
    debug!("{} files match {}", paths.len(), pattern);

    let groups: Vec<_> = paths.chunks(files_per_partition.max(1))
        .map(|group| Deferred::lift(group.to_vec(), Some(&format!("Files: {}", group[0].display()))))
        .collect();

    Ok(Bag::from_defs(batch_try_apply(&groups, move |_idx, paths| read_files(paths, compression))))
}

#[derive(Clone)]
struct Chunk { path: PathBuf, start: u64, end: u64 }

/// Reads a single uncompressed file as a Bag of lines, one partition per
/// `chunk_size` bytes.  A line belongs to the chunk in which it starts.
pub fn read_text_chunked(path: &str, chunk_size: u64) -> Result<Bag<String>, BagError> {
    let file_size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BagError::SourceNotFound { pattern: path.to_owned() })
        },
        Err(e) => return Err(e.into())
    };
    let chunk_size = chunk_size.max(1);
    let mut dfs = Vec::new();
    let mut cur_offset = 0u64;
    loop {
        let chunk = Chunk {
            path: path.into(),
            start: cur_offset,
            end: cur_offset + chunk_size
        };
        dfs.push(Deferred::lift(chunk,
                                Some(&format!("File: {}, start: {}", path, cur_offset))));
        cur_offset += chunk_size;
        if cur_offset >= file_size { break; }
    }
    debug!("Split {} ({} bytes) into {} chunks", path, file_size, dfs.len());

    Ok(Bag::from_defs(batch_try_apply(&dfs, read_chunk)))
}

fn decode_line(buf: &[u8]) -> Result<String, TaskFailure> {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8(line.to_vec()).map_err(TaskFailure::fatal)
}

fn read_chunk(_idx: usize, chunk: &Chunk) -> Result<Vec<String>, TaskFailure> {
    let f = File::open(&chunk.path).map_err(io_failure)?;
    let mut reader = BufReader::new(f);

    // Skip to the first line starting at or after `start`
    let mut pos = if chunk.start > 0 {
        reader.seek(SeekFrom::Start(chunk.start - 1)).map_err(io_failure)?;
        let mut skipped = Vec::new();
        let size = reader.read_until(b'\n', &mut skipped).map_err(io_failure)?;
        chunk.start - 1 + size as u64
    } else {
        0
    };

    let mut lines = Vec::new();
    let mut buf = Vec::new();
    while pos < chunk.end {
        buf.clear();
        let size = reader.read_until(b'\n', &mut buf).map_err(io_failure)?;
        if size == 0 { break; }
        pos += size as u64;
        lines.push(decode_line(&buf)?);
    }
    Ok(lines)
}
