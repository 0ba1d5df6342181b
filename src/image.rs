//! image — приёмники восстановленного образа (OutputImage).
//!
//! PageSink — позиционная запись целых страниц. Порядок записей = порядок прихода,
//! каждая запись целиком заменяет свой 4096-байтовый регион.
//!
//! - FileImage: разреженный файл (set_len + seek/write), эксклюзивный fs2-lock на время сессии.
//! - MemImage:  образ в памяти (тесты, небольшие дампы).
//! - NullImage: ничего не пишет (режим "только проверка").

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::error::{Result, SnapError};

pub trait PageSink {
    /// Announce the logical image length once it is known.
    fn set_logical_size(&mut self, bytes: u64) -> io::Result<()>;

    /// Write `data` at absolute byte `offset`, replacing what was there.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Flush everything written so far.
    fn flush_image(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: PageSink + ?Sized> PageSink for &mut S {
    fn set_logical_size(&mut self, bytes: u64) -> io::Result<()> {
        (**self).set_logical_size(bytes)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, data)
    }

    fn flush_image(&mut self) -> io::Result<()> {
        (**self).flush_image()
    }
}

// -------------------- FileImage --------------------

pub struct FileImage {
    file: File,
    path: PathBuf,
}

impl FileImage {
    /// Create (truncate) the output file and take an exclusive advisory lock on it.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SnapError::Write { offset: 0, source: e })?;
        if file.try_lock_exclusive().is_err() {
            return Err(SnapError::Locked(path.to_path_buf()));
        }
        // усекаем только под локом, чтобы не затереть образ чужой сессии
        file.set_len(0)
            .map_err(|e| SnapError::Write { offset: 0, source: e })?;
        debug!("image: created {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl PageSink for FileImage {
    fn set_logical_size(&mut self, bytes: u64) -> io::Result<()> {
        // set_len не выделяет блоки — файл остаётся разреженным
        if self.file.metadata()?.len() < bytes {
            self.file.set_len(bytes)?;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn flush_image(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

impl Drop for FileImage {
    fn drop(&mut self) {
        // ошибки unlock при drop игнорируем
        let _ = self.file.unlock();
    }
}

// -------------------- MemImage --------------------

#[derive(Debug, Default, Clone)]
pub struct MemImage {
    bytes: Vec<u8>,
}

impl MemImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl PageSink for MemImage {
    fn set_logical_size(&mut self, bytes: u64) -> io::Result<()> {
        let want = usize::try_from(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "image too large"))?;
        if self.bytes.len() < want {
            self.bytes.resize(want, 0);
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "offset too large"))?;
        let end = start + data.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}

// -------------------- NullImage --------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct NullImage;

impl PageSink for NullImage {
    fn set_logical_size(&mut self, _bytes: u64) -> io::Result<()> {
        Ok(())
    }

    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_image_grows_and_overwrites() {
        let mut m = MemImage::new();
        m.set_logical_size(8).unwrap();
        m.write_at(4, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(m.as_bytes(), &[0, 0, 0, 0, 1, 2, 3, 4, 5, 6]);
        m.write_at(0, &[9, 9]).unwrap();
        assert_eq!(&m.as_bytes()[..2], &[9, 9]);
    }
}
