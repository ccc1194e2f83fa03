use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use memmap2::MmapMut;

use super::BackingStore;

/// memmap2 による読み書き可能なマップドファイルストア
pub struct MmapStore {
    mmap: MmapMut,
    len: u64,
}

impl MmapStore {
    /// ファイルを読み書き可能でマップする
    ///
    /// 空ファイルはマップできないのでエラーにする。
    pub fn open_rw(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot map empty file {}", path.display()),
            ));
        }
        // SAFETY: マップ中はファイルを外部から変更しないこと
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { mmap, len })
    }
}

impl BackingStore for MmapStore {
    fn size(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset > self.len {
            return Err(super::beyond_end(offset));
        }
        let start = offset as usize;
        let count = buf.len().min(self.mmap.len() - start);
        buf[..count].copy_from_slice(&self.mmap[start..start + count]);
        Ok(count)
    }

    fn write_at(&mut self, offset: u64, byte: u8) -> io::Result<()> {
        match self.mmap.get_mut(offset as usize) {
            Some(cell) => {
                *cell = byte;
                Ok(())
            }
            None => Err(super::beyond_end(offset)),
        }
    }

    fn is_writable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn map_read_write() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"mapped bytes").unwrap();
        file.flush().unwrap();

        let mut store = MmapStore::open_rw(file.path()).unwrap();
        assert_eq!(store.size(), 12);
        assert!(store.is_writable());

        let mut buf = [0u8; 6];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"mapped");

        store.write_at(0, b'M').unwrap();
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"Mapped");
        assert!(store.write_at(12, 0).is_err());
    }

    #[test]
    fn empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(MmapStore::open_rw(file.path()).is_err());
    }
}
