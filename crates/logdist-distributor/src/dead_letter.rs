use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use logdist_common::{DeadLetterEntry, LogPacket, Result};
use parking_lot::Mutex;
use tracing::{error, info};

/// On-disk store for permanently-failed packets.
///
/// The file is a single JSON array of [`DeadLetterEntry`]. Every append
/// re-reads the array, enforces the size cap, and rewrites the file via
/// a temp file and rename so concurrent readers never observe a partial
/// write. Appends are serialized by an internal mutex.
pub struct DeadLetterStore {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl DeadLetterStore {
    pub fn new(path: PathBuf, max_entries: usize) -> Self {
        Self {
            path,
            max_entries,
            write_lock: Mutex::new(()),
        }
    }

    /// Appends one entry, rotating out the oldest half of the file when
    /// the cap is reached. An unreadable or unparsable existing file is
    /// logged and replaced by a fresh array; the append itself still
    /// happens.
    pub fn append(&self, packet: &LogPacket, final_error: &str) {
        let _guard = self.write_lock.lock();

        let mut entries: Vec<DeadLetterEntry> = match fs::read(&self.path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("failed to parse existing dead letter file: {}", e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        if entries.len() >= self.max_entries {
            let keep = self.max_entries / 2;
            entries.drain(..entries.len() - keep);
            info!("rotated dead letter file, keeping {} entries", entries.len());
        }

        entries.push(DeadLetterEntry {
            packet: packet.clone(),
            final_error: final_error.to_string(),
            failed_at: Utc::now(),
        });

        match self.write_atomic(&entries) {
            Ok(()) => info!(
                "packet {} saved to dead letter file {}",
                packet.id,
                self.path.display()
            ),
            Err(e) => error!("failed to write dead letter file: {}", e),
        }
    }

    /// Reads the whole file back. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<DeadLetterEntry>> {
        let _guard = self.write_lock.lock();
        match fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, entries: &[DeadLetterEntry]) -> Result<()> {
        let data = serde_json::to_vec(entries)?;

        let mut tmp_name = OsString::from(self.path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
