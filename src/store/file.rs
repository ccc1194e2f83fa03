use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::BackingStore;

/// ファイルを seek+read/write で扱うストア
pub struct FileStore {
    file: File,
    size: u64,
    path: PathBuf,
    writable: bool,
}

impl FileStore {
    /// 読み取り専用で開く
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size, path, writable: false })
    }

    /// 読み書き可能で開く
    pub fn open_rw(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size, path, writable: true })
    }

    /// ファイルパス
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for FileStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset > self.size {
            return Err(super::beyond_end(offset));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let want = (self.size - offset).min(buf.len() as u64) as usize;
        let mut total = 0;
        while total < want {
            let count = self.file.read(&mut buf[total..want])?;
            if count == 0 {
                break;
            }
            total += count;
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, byte: u8) -> io::Result<()> {
        if offset >= self.size {
            return Err(super::beyond_end(offset));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&[byte])
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn read_write_round() {
        let file = fixture(b"0123456789");
        let mut store = FileStore::open_rw(file.path()).unwrap();
        assert_eq!(store.size(), 10);
        assert!(store.is_writable());

        let mut buf = [0u8; 4];
        assert_eq!(store.read_at(2, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"2345");

        store.write_at(0, b'X').unwrap();
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"X123");
    }

    #[test]
    fn read_clamps_at_end() {
        let file = fixture(b"abc");
        let mut store = FileStore::open(file.path()).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
        assert!(store.read_at(4, &mut buf).is_err());
    }

    #[test]
    fn readonly_open_reports_not_writable() {
        let file = fixture(b"abc");
        let store = FileStore::open(file.path()).unwrap();
        assert!(!store.is_writable());
    }
}
