use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::{CacheError, CacheResult, EntryKey};

const ARCHIVE_MAGIC: u32 = 0x3143_5241; // "ARC1"
const ARCHIVE_VERSION: u32 = 1;

const FILE_HEADER_LEN: u64 = 8;
const ENTRY_HEADER_LEN: usize = 16 + 4 + 4;

/// 轻量滚动校验和：足够发现截断/随机翻转，非 cryptographic。
fn crc32_simple(data: &[u8]) -> u32 {
    let mut s: u32 = 0;
    for &b in data {
        s = s.wrapping_add(b as u32);
        s = s.rotate_left(3);
    }
    s
}

fn le_u32(b: &[u8]) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    u32::from_le_bytes(a)
}

/// 归档条目头，按文件顺序可枚举。
#[derive(Clone, Copy, Debug)]
pub struct ArchiveEntryHeader {
    pub entry_key: EntryKey,
    pub ordinal_id: u64,
    pub payload_size: usize,
}

/// Append-only 归档文件。
///
/// - 记录布局：`entry_key[16] | payload_len u32 | crc u32 | payload`
/// - ordinal_id 即记录起始字节偏移，作为定位句柄
/// - 物理写经 write 锁串行；物理读经独立的 read 锁（独立句柄）串行，
///   读不会被无关的写阻塞
pub struct ArchiveFile {
    path: PathBuf,
    write: Mutex<File>,
    read: Mutex<File>,
}

impl ArchiveFile {
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let write = open_or_init(&path)?;
        let read = OpenOptions::new().read(true).open(&path)?;
        Ok(Self {
            path,
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录，返回其 ordinal（记录起始偏移）。
    pub fn append(&self, key: &EntryKey, payload: &[u8]) -> CacheResult<u64> {
        let len: u32 = payload
            .len()
            .try_into()
            .map_err(|_| CacheError::InvalidValue("payload exceeds u32::MAX bytes"))?;
        let crc = crc32_simple(payload);

        let mut f = self.write.lock();
        let ordinal = f.seek(SeekFrom::End(0))?;
        f.write_all(key)?;
        f.write_all(&len.to_le_bytes())?;
        f.write_all(&crc.to_le_bytes())?;
        f.write_all(payload)?;
        f.flush()?;
        Ok(ordinal)
    }

    /// 按 ordinal 读回 payload；buf 长度必须与记录一致。
    pub fn read_payload(&self, ordinal_id: u64, buf: &mut [u8]) -> CacheResult<()> {
        let mut f = self.read.lock();
        f.seek(SeekFrom::Start(ordinal_id))?;

        let mut hdr = [0u8; ENTRY_HEADER_LEN];
        f.read_exact(&mut hdr)?;
        let len = le_u32(&hdr[16..20]) as usize;
        let crc = le_u32(&hdr[20..24]);

        if len != buf.len() {
            return Err(CacheError::InvalidValue("buffer size does not match record"));
        }
        f.read_exact(buf)?;
        if crc32_simple(buf) != crc {
            return Err(CacheError::Corrupted(ordinal_id));
        }
        Ok(())
    }

    /// 全量枚举条目头（seek 跳过 payload）。
    /// 尾部截断记录视为上次写入中断：告警后忽略，不作为错误。
    pub fn headers(&self) -> CacheResult<Vec<ArchiveEntryHeader>> {
        let mut f = self.read.lock();
        let end = f.seek(SeekFrom::End(0))?;
        let mut pos = f.seek(SeekFrom::Start(FILE_HEADER_LEN))?;

        let mut out = Vec::new();
        let mut hdr = [0u8; ENTRY_HEADER_LEN];
        while pos < end {
            if f.read_exact(&mut hdr).is_err() {
                tracing::warn!(
                    "archive {:?}: truncated header at ordinal {}, ignoring tail",
                    self.path,
                    pos
                );
                break;
            }
            let mut entry_key: EntryKey = [0u8; 16];
            entry_key.copy_from_slice(&hdr[..16]);
            let payload_size = le_u32(&hdr[16..20]) as usize;

            let next = pos + ENTRY_HEADER_LEN as u64 + payload_size as u64;
            if next > end {
                tracing::warn!(
                    "archive {:?}: truncated payload at ordinal {}, ignoring tail",
                    self.path,
                    pos
                );
                break;
            }
            out.push(ArchiveEntryHeader {
                entry_key,
                ordinal_id: pos,
                payload_size,
            });
            pos = f.seek(SeekFrom::Start(next))?;
        }
        Ok(out)
    }
}

fn open_or_init(path: &Path) -> CacheResult<File> {
    let exists = path.exists();
    let mut f = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    if !exists {
        f.write_all(&ARCHIVE_MAGIC.to_le_bytes())?;
        f.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
        f.flush()?;
        return Ok(f);
    }

    let mut hdr = [0u8; 8];
    f.seek(SeekFrom::Start(0))?;
    let valid = match f.read_exact(&mut hdr) {
        Ok(()) => le_u32(&hdr[0..4]) == ARCHIVE_MAGIC && le_u32(&hdr[4..8]) == ARCHIVE_VERSION,
        Err(_) => false,
    };

    if !valid {
        // 空文件/历史垃圾：truncate 重建，避免后续读崩。
        tracing::warn!("archive {:?}: invalid file header, reinitializing", path);
        let mut nf = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        nf.write_all(&ARCHIVE_MAGIC.to_le_bytes())?;
        nf.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
        nf.flush()?;
        drop(nf);
        f = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
    }

    Ok(f)
}
