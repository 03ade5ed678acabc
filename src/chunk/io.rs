//! Positioned file I/O for chunked reads and writes, cross-platform via
//! `positioned-io` rather than `std::os::unix::fs::FileExt` (chunks can
//! land out of order and from concurrent tasks, so sequential
//! seek-then-read/write is not an option on any platform).

use anyhow::{Context, Result};
use positioned_io::{ReadAt, WriteAt};
use std::fs::File;
use std::sync::Arc;

pub fn read_chunk_at_position(file_handle: &Arc<File>, start: u64, len: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    let file: &File = file_handle.as_ref();
    file.read_exact_at(start, &mut buffer)
        .context(format!("failed to read chunk at offset {start}"))?;
    Ok(buffer)
}

/// Write `data` at `start`, used when reassembling an inbound transfer.
/// Received chunks may arrive out of order, so the destination file
/// must support positioned writes rather than sequential append.
pub fn write_chunk_at_position(file_handle: &mut Arc<File>, start: u64, data: &[u8]) -> Result<()> {
    let file = Arc::get_mut(file_handle).expect("file handle exclusively owned during write");
    file.write_all_at(start, data)
        .context(format!("failed to write chunk at offset {start}"))?;
    Ok(())
}
