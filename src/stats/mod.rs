use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 单层操作计数（advisory：Relaxed 递增，不参与任何判定路径）。
#[derive(Debug, Default)]
pub struct LayerStats {
    /// 进入本层的 query 总数
    pub queries: AtomicU64,
    /// 本层存储直接命中
    pub local_hits: AtomicU64,
    /// 转发给下游后命中
    pub forwarded_hits: AtomicU64,
    /// 整条可达链 miss
    pub misses: AtomicU64,
    /// 本层存储成功的 store
    pub stores: AtomicU64,
    /// 成功把下游数据复制进本层的次数
    pub promotions: AtomicU64,
    /// promotion 失败（已降级为告警）
    pub promotion_failures: AtomicU64,
}

impl LayerStats {
    pub fn snapshot(&self) -> LayerStatsSnapshot {
        LayerStatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            forwarded_hits: self.forwarded_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
        }
    }
}

/// 计数快照：普通值类型，便于上报与断言。
#[derive(Clone, Debug, Default)]
pub struct LayerStatsSnapshot {
    pub queries: u64,
    pub local_hits: u64,
    pub forwarded_hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub promotions: u64,
    pub promotion_failures: u64,
}

impl fmt::Display for LayerStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queries={} local_hits={} forwarded_hits={} misses={} stores={} promotions={} promotion_failures={}",
            self.queries,
            self.local_hits,
            self.forwarded_hits,
            self.misses,
            self.stores,
            self.promotions,
            self.promotion_failures,
        )
    }
}
