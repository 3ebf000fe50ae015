//! Append-only-file persistence for the branch store: a `Set`/`Delete`
//! command log, fsynced on every write and replayed in full on open.
//! Branch records carry no TTL at this layer — expiry is a cache
//! concern, not a store concern — so the command log only needs the two
//! variants below.

use crate::error::{GeoBankError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// AOF (Append-Only File) for persistence
pub struct AOFFile {
    file: File,
    writer: BufWriter<File>,
    path: std::path::PathBuf,
    size: u64,
}

/// AOF command types
#[derive(Debug, Clone)]
pub enum AOFCommand {
    Set { key: Bytes, value: Bytes },
    Delete { key: Bytes },
}

impl AOFFile {
    /// Open an AOF file at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len();

        let writer_file = file.try_clone()?;
        let writer = BufWriter::new(writer_file);

        Ok(Self {
            file,
            writer,
            path,
            size,
        })
    }

    /// Get the current size of the AOF file
    pub fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    /// Write a SET command to the AOF
    pub fn write_set(&mut self, key: &Bytes, value: &Bytes) -> Result<()> {
        self.write_command(&AOFCommand::Set {
            key: key.clone(),
            value: value.clone(),
        })
    }

    /// Write a DELETE command to the AOF
    pub fn write_delete(&mut self, key: &Bytes) -> Result<()> {
        self.write_command(&AOFCommand::Delete { key: key.clone() })
    }

    /// Write a command to the AOF file
    fn write_command(&mut self, command: &AOFCommand) -> Result<()> {
        let serialized = self.serialize_command(command);
        self.writer.write_all(&serialized)?;
        self.size += serialized.len() as u64;
        Ok(())
    }

    /// Serialize a command to bytes using a simple binary format
    fn serialize_command(&self, command: &AOFCommand) -> Vec<u8> {
        let mut buf = BytesMut::new();

        match command {
            AOFCommand::Set { key, value } => {
                buf.put_u8(1);
                buf.put_u32(key.len() as u32);
                buf.put(key.as_ref());
                buf.put_u32(value.len() as u32);
                buf.put(value.as_ref());
            }
            AOFCommand::Delete { key } => {
                buf.put_u8(2);
                buf.put_u32(key.len() as u32);
                buf.put(key.as_ref());
            }
        }

        buf.to_vec()
    }

    /// Read and replay all commands from the AOF file
    pub fn replay<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(AOFCommand) -> Result<()>,
    {
        self.file.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::new(&mut self.file);
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;

        if buffer.is_empty() {
            return Ok(());
        }

        let mut buf = Bytes::from(buffer);
        while buf.remaining() > 0 {
            let command = self.deserialize_command(&mut buf)?;
            callback(command)?;
        }

        Ok(())
    }

    /// Deserialize a command from bytes
    fn deserialize_command(&self, buf: &mut Bytes) -> Result<AOFCommand> {
        if buf.remaining() < 1 {
            return Err(GeoBankError::Serialization("corrupt AOF record".into()));
        }

        let cmd_type = buf.get_u8();

        match cmd_type {
            1 => {
                if buf.remaining() < 4 {
                    return Err(GeoBankError::Serialization("corrupt AOF record".into()));
                }
                let key_len = buf.get_u32() as usize;
                if buf.remaining() < key_len {
                    return Err(GeoBankError::Serialization("corrupt AOF record".into()));
                }
                let key = buf.copy_to_bytes(key_len);

                if buf.remaining() < 4 {
                    return Err(GeoBankError::Serialization("corrupt AOF record".into()));
                }
                let value_len = buf.get_u32() as usize;
                if buf.remaining() < value_len {
                    return Err(GeoBankError::Serialization("corrupt AOF record".into()));
                }
                let value = buf.copy_to_bytes(value_len);

                Ok(AOFCommand::Set { key, value })
            }
            2 => {
                if buf.remaining() < 4 {
                    return Err(GeoBankError::Serialization("corrupt AOF record".into()));
                }
                let key_len = buf.get_u32() as usize;
                if buf.remaining() < key_len {
                    return Err(GeoBankError::Serialization("corrupt AOF record".into()));
                }
                let key = buf.copy_to_bytes(key_len);

                Ok(AOFCommand::Delete { key })
            }
            _ => Err(GeoBankError::Serialization("corrupt AOF record".into())),
        }
    }

    /// Flush the write buffer to disk
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Sync data to disk
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Get the path of the AOF file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AOFFile {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
