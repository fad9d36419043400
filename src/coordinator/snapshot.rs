//! Snapshot files
//!
//! Format:
//! ```text
//! [MAGIC: 8 bytes "SCSNAP01"][LEN: u64][PAYLOAD: bincode Coordinator][CRC32: u32]
//! ```
//! The checksum covers the payload only. Files are written to a temporary
//! sibling and renamed into place.

use crate::common::{crc32, Error, Result};
use crate::coordinator::server::Coordinator;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const SNAPSHOT_MAGIC: &[u8; 8] = b"SCSNAP01";

/// Upper bound on a payload we are willing to allocate for
const MAX_SNAPSHOT_SIZE: u64 = 1 << 32;

pub fn save_snapshot(coord: &Coordinator, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let payload = coord.snapshot()?;
    let tmp = path.with_extension("tmp");

    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&crc32(&payload).to_le_bytes())?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp, path)?;

    tracing::info!(
        "saved snapshot of version {} to {} ({} bytes)",
        coord.version(),
        path.display(),
        payload.len()
    );
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Coordinator> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(Error::Corrupted("Invalid snapshot magic".into()));
    }

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_SNAPSHOT_SIZE {
        return Err(Error::Corrupted(format!(
            "snapshot payload of {} bytes is too large",
            len
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let expected = u32::from_le_bytes(crc_bytes);
    let actual = crc32(&payload);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    let coord = Coordinator::restore(&payload)?;
    tracing::info!(
        "loaded snapshot of version {} from {}",
        coord.version(),
        path.display()
    );
    Ok(coord)
}
