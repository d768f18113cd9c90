//! Append-only file persistence for Chorda.
//!
//! Records are length-prefixed bincode frames. Replay on open restores the
//! store; a size-triggered rewrite compacts the file by re-emitting only the
//! live state (overwritten and pruned points drop out).

use crate::error::{ChordaError, Result};
use crate::types::{Measurement, SyncMode};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// AOF configuration for rewriting
#[derive(Debug, Clone)]
pub struct AofConfig {
    /// Trigger rewrite when file size exceeds this many bytes
    pub rewrite_size_threshold: u64,
}

impl Default for AofConfig {
    fn default() -> Self {
        Self {
            rewrite_size_threshold: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// One durable engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AofCommand {
    Append {
        instrument_id: u32,
        variable: String,
        timestamp_ms: i64,
        value: f64,
    },
    /// Retention cut: on replay, drop every point with `timestamp < cutoff_ms`.
    Prune { cutoff_ms: i64 },
}

impl AofCommand {
    pub fn append(m: &Measurement) -> Self {
        AofCommand::Append {
            instrument_id: m.instrument_id,
            variable: m.variable.clone(),
            timestamp_ms: m.timestamp_ms,
            value: m.value,
        }
    }

    pub fn into_measurement(self) -> Option<Measurement> {
        match self {
            AofCommand::Append {
                instrument_id,
                variable,
                timestamp_ms,
                value,
            } => Some(Measurement::new(instrument_id, variable, timestamp_ms, value)),
            AofCommand::Prune { .. } => None,
        }
    }
}

const SCRATCH_INITIAL_CAPACITY: usize = 8 * 1024;
const SCRATCH_SHRINK_THRESHOLD: usize = 1 << 20;

/// Append-only file for embedded engine persistence
pub struct AofFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    config: AofConfig,
    rewrite_in_progress: bool,
    scratch: BytesMut,
}

impl AofFile {
    /// Open AOF file with default configuration
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, AofConfig::default())
    }

    /// Open AOF file with custom configuration
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: AofConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let writer_file = file.try_clone()?;
        let writer = BufWriter::new(writer_file);

        Ok(AofFile {
            file,
            writer,
            path,
            size,
            config,
            rewrite_in_progress: false,
            scratch: BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY),
        })
    }

    /// Get current file size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write an APPEND record to the AOF
    pub fn write_append(&mut self, m: &Measurement) -> Result<()> {
        self.write_command(&AofCommand::append(m))
    }

    /// Write a PRUNE record to the AOF
    pub fn write_prune(&mut self, cutoff_ms: i64) -> Result<()> {
        self.write_command(&AofCommand::Prune { cutoff_ms })
    }

    /// Write a command to the AOF file
    pub fn write_command(&mut self, command: &AofCommand) -> Result<()> {
        if self.rewrite_in_progress {
            return Err(ChordaError::RewriteInProgress);
        }

        let written_len = self.serialize_command(command)?;
        self.writer.write_all(&self.scratch[..written_len])?;
        self.size += written_len as u64;

        if self.scratch.capacity() > SCRATCH_SHRINK_THRESHOLD
            && written_len <= SCRATCH_INITIAL_CAPACITY
        {
            self.scratch = BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY);
        }

        // Check if we should trigger a rewrite
        if self.should_rewrite() {
            self.maybe_trigger_rewrite()?;
        }

        Ok(())
    }

    /// Serialize a command into the reusable scratch buffer.
    ///
    /// Frame layout: u32 big-endian payload length, then the bincode payload.
    fn serialize_command(&mut self, command: &AofCommand) -> Result<usize> {
        let payload =
            bincode::serialize(command).map_err(|e| ChordaError::Serialization(e.to_string()))?;

        let needed = 4 + payload.len();
        self.scratch.clear();
        if self.scratch.capacity() < needed {
            self.scratch.reserve(needed - self.scratch.capacity());
        }

        let buf = &mut self.scratch;
        buf.put_u32(payload.len() as u32);
        buf.put(payload.as_slice());

        Ok(buf.len())
    }

    /// Check if AOF should be rewritten based on size threshold
    fn should_rewrite(&self) -> bool {
        !self.rewrite_in_progress && self.size >= self.config.rewrite_size_threshold
    }

    /// Trigger AOF rewrite if conditions are met
    fn maybe_trigger_rewrite(&mut self) -> Result<()> {
        if self.rewrite_in_progress {
            return Ok(());
        }

        // Synchronous rewrite: background rewrite would require thread
        // coordination which the embedded engine avoids
        self.perform_rewrite()
    }

    /// Rewrite the AOF, keeping only live state.
    ///
    /// Replays the current file, folds overwrites and prune cutoffs, and
    /// re-emits one APPEND per surviving point into a temp file that
    /// atomically replaces the original.
    fn perform_rewrite(&mut self) -> Result<()> {
        if self.rewrite_in_progress {
            return Err(ChordaError::RewriteInProgress);
        }

        self.rewrite_in_progress = true;

        // Perform the rewrite and always clear the flag, even on error
        let result = (|| {
            self.writer.flush()?;
            self.file.sync_all()?;

            let commands = self.replay_from_start()?;
            let live = Self::fold_commands(commands);

            let rewrite_path = self.path.with_extension("aof.rewrite");
            let mut rewrite_file = Self::open_with_config(&rewrite_path, self.config.clone())?;

            for m in live {
                let len = rewrite_file.serialize_command(&AofCommand::append(&m))?;
                let frame = rewrite_file.scratch[..len].to_vec();
                rewrite_file.writer.write_all(&frame)?;
                rewrite_file.size += len as u64;
            }
            rewrite_file.flush()?;

            // Sync rewritten file to disk before rename so the swap is durable
            rewrite_file.sync()?;

            std::fs::rename(&rewrite_path, &self.path)?;

            // Reopen the file with new handles
            let new_file = OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&self.path)?;

            let new_size = new_file.metadata()?.len();
            let writer_file = new_file.try_clone()?;
            let new_writer = BufWriter::new(writer_file);

            self.file = new_file;
            self.writer = new_writer;
            self.size = new_size;

            Ok(())
        })();

        self.rewrite_in_progress = false;

        result
    }

    /// Fold a replayed command stream into the surviving measurements.
    fn fold_commands(commands: Vec<AofCommand>) -> Vec<Measurement> {
        use std::collections::BTreeMap;

        let mut live: BTreeMap<(u32, String, i64), f64> = BTreeMap::new();
        for command in commands {
            match command {
                AofCommand::Append {
                    instrument_id,
                    variable,
                    timestamp_ms,
                    value,
                } => {
                    live.insert((instrument_id, variable, timestamp_ms), value);
                }
                AofCommand::Prune { cutoff_ms } => {
                    live.retain(|&(_, _, ts), _| ts >= cutoff_ms);
                }
            }
        }

        live.into_iter()
            .map(|((instrument_id, variable, timestamp_ms), value)| {
                Measurement::new(instrument_id, variable, timestamp_ms, value)
            })
            .collect()
    }

    fn replay_from_start(&mut self) -> Result<Vec<AofCommand>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut commands = Vec::new();

        loop {
            match Self::read_command(&mut reader) {
                Ok(command) => commands.push(command),
                Err(ChordaError::UnexpectedEof) => break, // End of file
                Err(e) => return Err(e),
            }
        }

        Ok(commands)
    }

    /// Replay AOF commands and return them
    pub fn replay(&mut self) -> Result<Vec<AofCommand>> {
        self.replay_from_start()
    }

    /// Read one length-prefixed frame from the reader
    fn read_command(reader: &mut BufReader<&mut File>) -> Result<AofCommand> {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            return Err(ChordaError::UnexpectedEof);
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        if let Err(err) = reader.read_exact(&mut payload) {
            return match err.kind() {
                std::io::ErrorKind::UnexpectedEof => Err(ChordaError::UnexpectedEof),
                _ => Err(ChordaError::from(err)),
            };
        }

        bincode::deserialize(&payload).map_err(|_| ChordaError::InvalidFormat)
    }

    /// Flush buffered writes to the OS
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.sync_with_mode(SyncMode::All)
    }

    /// Flush and sync using the provided mode.
    pub fn sync_with_mode(&mut self, mode: SyncMode) -> Result<()> {
        self.writer.flush()?;
        match mode {
            SyncMode::All => self.file.sync_all()?,
            SyncMode::Data => self.file.sync_data()?,
        }
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AofFile {
    fn drop(&mut self) {
        // Best effort flush on drop, ignore errors
        let _ = self.writer.flush();
    }
}
