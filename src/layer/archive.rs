use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{CacheError, CacheResult, EntryKey, Hash128};
use crate::layer::chain::{CacheStorage, ChainLayer, LocalEntry, QueryResult};
use crate::storage::archive_file::{ArchiveEntryHeader, ArchiveFile};

/// 初始索引容量：按几千条目的 shader/pipeline 缓存规模预留。
const INITIAL_INDEX_CAPACITY: usize = 2048;

/// 内存索引记录。ordinal 定位归档记录；创建后不原地改写，
/// 同 key re-store 整条替换（旧归档记录成为孤儿，归档只追加不回收）。
#[derive(Clone, Copy, Debug)]
struct Entry {
    ordinal_id: u64,
    data_size: usize,
}

/// 归档文件层存储：内存索引 + append-only 归档。
///
/// 锁纪律：
/// - 索引 RwLock：查询并发、插入互斥
/// - 文件读/写互斥锁在 ArchiveFile 内部，相互独立，也独立于索引锁，
///   load 期间不持索引锁
pub struct ArchiveStore {
    archive: ArchiveFile,
    entries: RwLock<HashMap<EntryKey, Entry>>,
}

/// 持久归档缓存层节点。
pub type FileArchiveCacheLayer = ChainLayer<ArchiveStore>;

impl FileArchiveCacheLayer {
    /// 打开（或创建）归档并构成链节点。空归档下索引为空。
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Arc<Self>> {
        Ok(Arc::new(ChainLayer::new(ArchiveStore::open(path)?)))
    }
}

impl ArchiveStore {
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let store = Self {
            archive: ArchiveFile::open(path)?,
            entries: RwLock::new(HashMap::with_capacity(INITIAL_INDEX_CAPACITY)),
        };
        store.refresh_headers()?;
        Ok(store)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn archive(&self) -> &ArchiveFile {
        &self.archive
    }

    fn add_header(&self, header: &ArchiveEntryHeader) {
        // 按文件顺序应用：同 key 重复时后写者胜，与在线 re-store 收敛一致
        self.entries.write().insert(
            header.entry_key,
            Entry {
                ordinal_id: header.ordinal_id,
                data_size: header.payload_size,
            },
        );
    }

    /// 全量扫描归档条目头并灌入索引。
    fn refresh_headers(&self) -> CacheResult<()> {
        let headers = self.archive.headers()?;
        let scanned = headers.len();
        for header in &headers {
            self.add_header(header);
        }
        tracing::info!(
            "archive {:?}: index refreshed, {} headers scanned, {} live entries",
            self.archive.path(),
            scanned,
            self.entry_count()
        );
        Ok(())
    }
}

impl CacheStorage for ArchiveStore {
    fn query_internal(&self, hash: &Hash128) -> CacheResult<LocalEntry> {
        let entries = self.entries.read();
        match entries.get(&hash.entry_key()) {
            Some(e) => Ok(LocalEntry {
                ordinal_id: e.ordinal_id,
                data_size: e.data_size,
            }),
            None => Err(CacheError::NotFound),
        }
    }

    fn store_internal(&self, hash: &Hash128, data: &[u8]) -> CacheResult<()> {
        // 先物理写完、再插索引：读者不可能看到尚未落盘的 ordinal
        let ordinal_id = self.archive.append(&hash.entry_key(), data)?;
        self.entries.write().insert(
            hash.entry_key(),
            Entry {
                ordinal_id,
                data_size: data.len(),
            },
        );
        Ok(())
    }

    fn load_internal(&self, query: &QueryResult, buf: &mut [u8]) -> CacheResult<()> {
        if buf.len() != query.data_size() {
            return Err(CacheError::InvalidValue("buffer size does not match entry"));
        }
        self.archive.read_payload(query.ordinal_id(), buf)
    }
}
