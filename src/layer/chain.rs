use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{CacheError, CacheResult, Hash128, LinkPolicy};
use crate::stats::{LayerStats, LayerStatsSnapshot};

/// 进程内唯一的层 ID 分配器（QueryResult 归属判定用）。
static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// 本层命中的最小描述：具体存储返回，链路引擎补全为 QueryResult。
#[derive(Clone, Copy, Debug)]
pub struct LocalEntry {
    pub ordinal_id: u64,
    pub data_size: usize,
}

/// 不透明查询结果：指向链上实际持有数据的层。
///
/// 只在紧随其后的 load 期间有效；链路拓扑或持有层内部状态变化后
/// 即视为过期，过期 locator 会被尺寸/校验检查拒绝而不是读出脏数据。
#[derive(Clone, Copy, Debug)]
pub struct QueryResult {
    layer_id: u64,
    hash: Hash128,
    ordinal_id: u64,
    data_size: usize,
}

impl QueryResult {
    pub fn hash(&self) -> Hash128 {
        self.hash
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// 持有数据的层 ID。
    pub fn owner_layer(&self) -> u64 {
        self.layer_id
    }

    pub(crate) fn ordinal_id(&self) -> u64 {
        self.ordinal_id
    }
}

/// 批量 store 的单项（borrow 调用方数据，不复制）。
#[derive(Clone, Copy, Debug)]
pub struct BatchEntry<'a> {
    pub hash: Hash128,
    pub data: &'a [u8],
}

/// 每个缓存层对外的能力集合。
///
/// 所有权约定：link 只共享引用计数（Arc），链本身无环；
/// 持链方自外向内拆链，拆链/重链期间不得有其他线程在途。
pub trait CacheLayer: Send + Sync {
    /// 查询 hash 的数据位置。NotFound 表示整条可达链都没有。
    fn query(&self, hash: &Hash128) -> CacheResult<QueryResult>;

    /// 存储数据。下游传播失败只告警，不覆盖本层结果。
    fn store(&self, hash: &Hash128, data: &[u8]) -> CacheResult<()>;

    /// 批量存储。默认不支持：链路引擎会回退为逐条 store。
    fn store_batch(&self, _entries: &[BatchEntry<'_>]) -> CacheResult<()> {
        Err(CacheError::Unsupported)
    }

    /// 按 query 结果读回数据；buf 长度必须等于 data_size。
    fn load(&self, query: &QueryResult, buf: &mut [u8]) -> CacheResult<()>;

    /// 链接下一层（替换旧链接）。总是成功。
    fn link(&self, next: Arc<dyn CacheLayer>) -> CacheResult<()>;

    fn set_load_policy(&self, policy: LinkPolicy) -> CacheResult<()>;
    fn set_store_policy(&self, policy: LinkPolicy) -> CacheResult<()>;

    fn layer_id(&self) -> u64;
}

/// 具体层只需提供的存储原语；遍历、promotion、策略全部在 ChainLayer。
pub trait CacheStorage: Send + Sync {
    fn query_internal(&self, hash: &Hash128) -> CacheResult<LocalEntry>;
    fn store_internal(&self, hash: &Hash128, data: &[u8]) -> CacheResult<()>;
    fn load_internal(&self, query: &QueryResult, buf: &mut [u8]) -> CacheResult<()>;

    /// 批量原语，默认不支持。
    fn store_batch_internal(&self, _entries: &[BatchEntry<'_>]) -> CacheResult<()> {
        Err(CacheError::Unsupported)
    }
}

/// 模板方法节点：把一个 CacheStorage 组合成完整的链上缓存层。
pub struct ChainLayer<S> {
    id: u64,
    storage: S,
    next: RwLock<Option<Arc<dyn CacheLayer>>>,
    load_policy: AtomicU32,
    store_policy: AtomicU32,
    stats: LayerStats,
}

impl<S: CacheStorage> ChainLayer<S> {
    pub fn new(storage: S) -> Self {
        Self {
            id: NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed),
            storage,
            next: RwLock::new(None),
            load_policy: AtomicU32::new(LinkPolicy::DEFAULT_LOAD.bits()),
            store_policy: AtomicU32::new(LinkPolicy::DEFAULT_STORE.bits()),
            stats: LayerStats::default(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn load_policy(&self) -> LinkPolicy {
        LinkPolicy::from_bits_truncate(self.load_policy.load(Ordering::Acquire))
    }

    pub fn store_policy(&self) -> LinkPolicy {
        LinkPolicy::from_bits_truncate(self.store_policy.load(Ordering::Acquire))
    }

    fn next_layer(&self) -> Option<Arc<dyn CacheLayer>> {
        self.next.read().clone()
    }

    fn local_result(&self, hash: &Hash128, entry: LocalEntry) -> QueryResult {
        QueryResult {
            layer_id: self.id,
            hash: *hash,
            ordinal_id: entry.ordinal_id,
            data_size: entry.data_size,
        }
    }

    /// 把下游命中的数据复制进本层，并把 locator 改指本层。
    /// promotion 永远是 best-effort：调用方负责把失败降级为告警。
    fn promote(&self, next: &Arc<dyn CacheLayer>, query: &mut QueryResult) -> CacheResult<()> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(query.data_size)
            .map_err(|_| CacheError::OutOfMemory(query.data_size))?;
        buf.resize(query.data_size, 0);

        next.load(query, &mut buf)?;
        self.storage.store_internal(&query.hash, &buf)?;

        let entry = self.storage.query_internal(&query.hash)?;
        *query = self.local_result(&query.hash, entry);
        self.stats.promotions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl<S: CacheStorage> CacheLayer for ChainLayer<S> {
    fn query(&self, hash: &Hash128) -> CacheResult<QueryResult> {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);
        let policy = self.load_policy();

        let mut result = Err(CacheError::NotFound);
        if !policy.contains(LinkPolicy::SKIP) {
            result = self
                .storage
                .query_internal(hash)
                .map(|e| self.local_result(hash, e));
            if result.is_ok() {
                self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            }
        }

        // 只有 NotFound 才向下游转发；其他错误原样返回
        if matches!(result, Err(CacheError::NotFound)) && policy.contains(LinkPolicy::PASS_CALLS) {
            if let Some(next) = self.next_layer() {
                result = next.query(hash);
                if let Ok(query) = result.as_mut() {
                    self.stats.forwarded_hits.fetch_add(1, Ordering::Relaxed);
                    if policy.contains(LinkPolicy::PASS_DATA | LinkPolicy::LOAD_ON_QUERY) {
                        // promotion 成功后 locator 改指本层；失败不影响下游结果
                        if let Err(e) = self.promote(&next, query) {
                            self.stats.promotion_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("layer {}: query promotion failed: {}", self.id, e);
                        }
                    }
                }
            }
        }

        if matches!(result, Err(CacheError::NotFound)) {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn store(&self, hash: &Hash128, data: &[u8]) -> CacheResult<()> {
        if data.is_empty() {
            return Err(CacheError::InvalidValue("zero-length payload"));
        }
        let policy = self.store_policy();

        let mut result = Ok(());
        if !policy.contains(LinkPolicy::SKIP) {
            result = self.storage.store_internal(hash, data);
            if result.is_ok() {
                self.stats.stores.fetch_add(1, Ordering::Relaxed);
            }
        }

        // 本层成功（或 SKIP）后才向下游复制；下游失败只告警，不改写结果
        if result.is_ok() && policy.contains(LinkPolicy::PASS_DATA) {
            if let Some(next) = self.next_layer() {
                let mut batched = Err(CacheError::Unsupported);
                if policy.contains(LinkPolicy::BATCH_STORE) {
                    batched = next.store_batch(&[BatchEntry { hash: *hash, data }]);
                }
                match batched {
                    Ok(()) => {}
                    Err(CacheError::Unsupported) => {
                        if let Err(e) = next.store(hash, data) {
                            tracing::warn!("layer {}: downstream store failed: {}", self.id, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("layer {}: downstream batch store failed: {}", self.id, e);
                    }
                }
            }
        }

        result
    }

    fn store_batch(&self, entries: &[BatchEntry<'_>]) -> CacheResult<()> {
        self.storage.store_batch_internal(entries)
    }

    fn load(&self, query: &QueryResult, buf: &mut [u8]) -> CacheResult<()> {
        if query.layer_id == self.id {
            return self.storage.load_internal(query, buf);
        }

        let policy = self.load_policy();
        if policy.contains(LinkPolicy::PASS_CALLS) {
            if let Some(next) = self.next_layer() {
                next.load(query, buf)?;

                // LOAD_ON_QUERY 的 promotion 已经在 query 时发生过
                if policy.contains(LinkPolicy::PASS_DATA)
                    && !policy.contains(LinkPolicy::LOAD_ON_QUERY)
                {
                    // 用 locator 副本做 promotion：调用方的 query 不可被修改
                    let mut tmp = *query;
                    if let Err(e) = self.promote(&next, &mut tmp) {
                        self.stats.promotion_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("layer {}: load promotion failed: {}", self.id, e);
                    }
                }
                return Ok(());
            }
        }

        Err(CacheError::NotFound)
    }

    fn link(&self, next: Arc<dyn CacheLayer>) -> CacheResult<()> {
        *self.next.write() = Some(next);
        Ok(())
    }

    fn set_load_policy(&self, policy: LinkPolicy) -> CacheResult<()> {
        policy.validate_for_load()?;
        self.load_policy.store(policy.bits(), Ordering::Release);
        Ok(())
    }

    fn set_store_policy(&self, policy: LinkPolicy) -> CacheResult<()> {
        policy.validate_for_store()?;
        self.store_policy.store(policy.bits(), Ordering::Release);
        Ok(())
    }

    fn layer_id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::memory_layer;

    fn blob(tag: &str) -> (Hash128, Vec<u8>) {
        let data = format!("payload for {}", tag).into_bytes();
        (Hash128::from_blob(&data), data)
    }

    /// query 可以、store 必败的桩存储（模拟只读/故障层）。
    struct FailingStore;

    impl CacheStorage for FailingStore {
        fn query_internal(&self, _hash: &Hash128) -> CacheResult<LocalEntry> {
            Err(CacheError::NotFound)
        }

        fn store_internal(&self, _hash: &Hash128, _data: &[u8]) -> CacheResult<()> {
            Err(CacheError::Io(std::io::Error::other("store always fails")))
        }

        fn load_internal(&self, _query: &QueryResult, _buf: &mut [u8]) -> CacheResult<()> {
            Err(CacheError::NotFound)
        }
    }

    #[test]
    fn store_query_load_roundtrip() {
        let layer = memory_layer();
        let (hash, data) = blob("roundtrip");

        layer.store(&hash, &data).unwrap();
        let query = layer.query(&hash).unwrap();
        assert_eq!(query.data_size(), data.len());

        let mut buf = vec![0u8; query.data_size()];
        layer.load(&query, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn query_unknown_key_is_notfound() {
        let layer = memory_layer();
        let (hash, _) = blob("never stored");
        assert!(matches!(layer.query(&hash), Err(CacheError::NotFound)));
    }

    #[test]
    fn zero_length_store_is_rejected() {
        let layer = memory_layer();
        let (hash, _) = blob("empty");
        assert!(matches!(
            layer.store(&hash, b""),
            Err(CacheError::InvalidValue(_))
        ));
    }

    #[test]
    fn policy_setters_reject_wrong_side_bits() {
        let layer = memory_layer();
        assert!(matches!(
            layer.set_load_policy(LinkPolicy::BATCH_STORE),
            Err(CacheError::InvalidValue(_))
        ));
        assert!(matches!(
            layer.set_store_policy(LinkPolicy::LOAD_ON_QUERY),
            Err(CacheError::InvalidValue(_))
        ));
        // 合法设置可替换旧策略
        layer
            .set_load_policy(LinkPolicy::SKIP | LinkPolicy::PASS_CALLS)
            .unwrap();
        assert_eq!(
            layer.load_policy(),
            LinkPolicy::SKIP | LinkPolicy::PASS_CALLS
        );
    }

    #[test]
    fn skip_load_policy_hides_local_entry() {
        let a = memory_layer();
        let b = memory_layer();
        let (hash, data) = blob("only in a");

        // 只落在 A：store 不下沉
        a.set_store_policy(LinkPolicy::empty()).unwrap();
        a.store(&hash, &data).unwrap();

        a.link(b).unwrap();
        a.set_load_policy(LinkPolicy::SKIP | LinkPolicy::PASS_CALLS)
            .unwrap();

        // A 被 SKIP、B 没有数据：整链 NotFound
        assert!(matches!(a.query(&hash), Err(CacheError::NotFound)));
    }

    #[test]
    fn store_pass_data_propagates_to_next() {
        let a = memory_layer();
        let b = memory_layer();
        a.link(b.clone()).unwrap();

        let (hash, data) = blob("fan out");
        a.store(&hash, &data).unwrap(); // 默认 store 策略带 PASS_DATA

        let query = b.query(&hash).unwrap();
        let mut buf = vec![0u8; query.data_size()];
        b.load(&query, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn load_on_query_promotes_eagerly() {
        let a = memory_layer();
        let b = memory_layer();
        a.link(b.clone()).unwrap();
        a.set_load_policy(
            LinkPolicy::PASS_CALLS | LinkPolicy::PASS_DATA | LinkPolicy::LOAD_ON_QUERY,
        )
        .unwrap();

        let (hash, data) = blob("promote on query");
        b.store(&hash, &data).unwrap();

        let query = a.query(&hash).unwrap();
        // promotion 成功后 locator 已指向 A
        assert_eq!(query.owner_layer(), a.layer_id());
        assert_eq!(a.stats().promotions, 1);

        // 绕开 B 直查 A：promotion 确实落了数据
        a.set_load_policy(LinkPolicy::empty()).unwrap();
        let local = a.query(&hash).unwrap();
        assert_eq!(local.data_size(), data.len());
    }

    #[test]
    fn explicit_load_promotes_with_copied_locator() {
        let a = memory_layer();
        let b = memory_layer();
        a.link(b.clone()).unwrap();
        // 默认 load 策略：PASS_DATA | PASS_CALLS，无 LOAD_ON_QUERY

        let (hash, data) = blob("promote on load");
        b.store(&hash, &data).unwrap();

        let query = a.query(&hash).unwrap();
        assert_eq!(query.owner_layer(), b.layer_id());

        let mut buf = vec![0u8; query.data_size()];
        a.load(&query, &mut buf).unwrap();
        assert_eq!(buf, data);
        // 调用方的 locator 保持原样
        assert_eq!(query.owner_layer(), b.layer_id());

        // promotion 已把数据落进 A
        assert_eq!(a.stats().promotions, 1);
        a.set_load_policy(LinkPolicy::empty()).unwrap();
        assert!(a.query(&hash).is_ok());
    }

    #[test]
    fn downstream_store_failure_keeps_local_success() {
        let a = memory_layer();
        let b: Arc<dyn CacheLayer> = Arc::new(ChainLayer::new(FailingStore));
        a.link(b).unwrap();

        let (hash, data) = blob("downstream failure");
        // 下游必败，但本层已成功：结果不被覆盖
        a.store(&hash, &data).unwrap();
        assert!(a.query(&hash).is_ok());
    }

    #[test]
    fn query_promotion_failure_keeps_downstream_result() {
        let a: Arc<ChainLayer<FailingStore>> = Arc::new(ChainLayer::new(FailingStore));
        let b = memory_layer();
        a.link(b.clone()).unwrap();
        a.set_load_policy(
            LinkPolicy::PASS_CALLS | LinkPolicy::PASS_DATA | LinkPolicy::LOAD_ON_QUERY,
        )
        .unwrap();

        let (hash, data) = blob("promotion failure");
        b.store(&hash, &data).unwrap();

        // A 的 store_internal 必败：promotion 失败降级为告警，下游结果原样返回
        let query = a.query(&hash).unwrap();
        assert_eq!(query.owner_layer(), b.layer_id());
        assert_eq!(a.stats().promotion_failures, 1);
    }

    #[test]
    fn pure_passthrough_skip_node() {
        let a = memory_layer();
        let b = memory_layer();
        a.link(b.clone()).unwrap();
        a.set_load_policy(LinkPolicy::SKIP | LinkPolicy::PASS_CALLS)
            .unwrap();
        a.set_store_policy(LinkPolicy::SKIP | LinkPolicy::PASS_DATA)
            .unwrap();

        let (hash, data) = blob("passthrough");
        a.store(&hash, &data).unwrap();

        // 本层无数据，一切经 B
        assert_eq!(a.storage().entry_count(), 0);
        let query = a.query(&hash).unwrap();
        assert_eq!(query.owner_layer(), b.layer_id());

        let mut buf = vec![0u8; query.data_size()];
        a.load(&query, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn misaddressed_load_without_chain_is_notfound() {
        let a = memory_layer();
        let b = memory_layer();
        let (hash, data) = blob("misaddressed");
        b.store(&hash, &data).unwrap();
        let query = b.query(&hash).unwrap();

        // A 未链接 B：load 无处可去
        let mut buf = vec![0u8; query.data_size()];
        assert!(matches!(
            a.load(&query, &mut buf),
            Err(CacheError::NotFound)
        ));
    }
}
