mod file;
mod mmap;

pub use file::FileStore;
pub use mmap::MmapStore;

use std::io;

/// ランダムアクセス可能なバイト列ソース
///
/// エンジンはこの trait を通してのみデータに触れる。読み込みは
/// 末尾で切り詰め、シーク不能などの失敗は Err で返す（エンジン側で
/// 回復可能エラーとして扱う）。
pub trait BackingStore {
    /// データ全長（バイト）
    fn size(&self) -> u64;

    /// 指定オフセットから読み込み、読めたバイト数を返す
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// 1バイト書き込み（即時に反映される）
    fn write_at(&mut self, offset: u64, byte: u8) -> io::Result<()>;

    /// 書き込み可能かどうか
    fn is_writable(&self) -> bool;
}

fn beyond_end(offset: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("offset {offset:#X} beyond end of store"),
    )
}

/// メモリ上のバイト列ストア
#[derive(Debug, Default)]
pub struct MemStore {
    data: Vec<u8>,
    writable: bool,
}

impl MemStore {
    /// 書き込み可能なストアを作成
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, writable: true }
    }

    /// 読み取り専用のストアを作成
    pub fn readonly(data: Vec<u8>) -> Self {
        Self { data, writable: false }
    }

    /// 内容への参照
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 内容を取り出す
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl BackingStore for MemStore {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset > self.data.len() as u64 {
            return Err(beyond_end(offset));
        }
        let start = offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }

    fn write_at(&mut self, offset: u64, byte: u8) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            ));
        }
        match self.data.get_mut(offset as usize) {
            Some(cell) => {
                *cell = byte;
                Ok(())
            }
            None => Err(beyond_end(offset)),
        }
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
