// mysqlbackup/src/backup/archive.rs
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::backup::cleanup::TempArtifact;
use crate::config::CompressionLevel;
use crate::errors::{AppError, Result, Stage};

pub const GZIP_SUFFIX: &str = ".gz";
const CHUNK_SIZE: usize = 64 * 1024;

/// `dir/orders_010124.sql` -> `dir/orders_010124.sql.gz`
pub fn compressed_path_for(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(GZIP_SUFFIX);
    PathBuf::from(name)
}

/// Gzips `source` next to itself and returns the path of the compressed file.
///
/// The source is streamed in fixed-size chunks and never deleted here. On any
/// failure, including `cancel` firing between chunks, the partially written
/// `.gz` file is removed before returning.
pub fn compress_file(
    source: &Path,
    level: CompressionLevel,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let target = source.display().to_string();
    let fail = |what: &str, e: io::Error| AppError::backup(&target, Stage::Compress, format!("{}: {}", what, e));

    let dest = compressed_path_for(source);
    let mut input = File::open(source).map_err(|e| fail("Failed to open dump file", e))?;

    let guard = TempArtifact::new(dest);
    let output = File::create(guard.path()).map_err(|e| fail("Failed to create compressed file", e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), level.as_flate2());

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total_bytes = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled(&target, Stage::Compress));
        }
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(fail("Failed to read dump file", e)),
        };
        encoder
            .write_all(&buf[..n])
            .map_err(|e| fail("Failed to write compressed data", e))?;
        total_bytes += n as u64;
    }

    let writer = encoder
        .finish()
        .map_err(|e| fail("Failed to finish gzip stream", e))?;
    let file = writer
        .into_inner()
        .map_err(|e| fail("Failed to flush compressed file", e.into_error()))?;
    file.sync_all()
        .map_err(|e| fail("Failed to sync compressed file", e))?;

    tracing::debug!(
        source = %source.display(),
        dest = %guard.path().display(),
        bytes = total_bytes,
        level = level.value(),
        "Compressed dump file"
    );
    Ok(guard.keep())
}
