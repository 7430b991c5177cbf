use bitflags::bitflags;

use crate::core::error::{CacheError, CacheResult};

bitflags! {
    /// 链路策略位：控制调用与数据如何沿缓存链移动。
    /// 每层的 load / store 两侧各持一份，独立配置。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkPolicy: u32 {
        /// 纯透传节点：永不读写本层存储
        const SKIP = 0b0000_0001;
        /// 本层 miss（或 load 未命中本层）时转发给下一层
        const PASS_CALLS = 0b0000_0010;
        /// 下游成功后把数据复制进/经本层（promotion、store 下沉）
        const PASS_DATA = 0b0000_0100;
        /// store 专用：优先对下游做一次批量 store，Unsupported 则逐条回退
        const BATCH_STORE = 0b0000_1000;
        /// load 专用：在 query 时即 promotion，不等显式 load
        const LOAD_ON_QUERY = 0b0001_0000;
    }
}

impl LinkPolicy {
    /// load 侧默认策略：转发 + promotion
    pub const DEFAULT_LOAD: LinkPolicy = LinkPolicy::PASS_DATA.union(LinkPolicy::PASS_CALLS);
    /// store 侧默认策略：向下游复制
    pub const DEFAULT_STORE: LinkPolicy = LinkPolicy::PASS_DATA;

    /// 校验可否用作 load 策略（BATCH_STORE 仅对 store 有意义）。
    pub fn validate_for_load(self) -> CacheResult<()> {
        if self.contains(LinkPolicy::BATCH_STORE) {
            return Err(CacheError::InvalidValue("BATCH_STORE is store-only"));
        }
        Ok(())
    }

    /// 校验可否用作 store 策略（LOAD_ON_QUERY 仅对 load 有意义）。
    pub fn validate_for_store(self) -> CacheResult<()> {
        if self.contains(LinkPolicy::LOAD_ON_QUERY) {
            return Err(CacheError::InvalidValue("LOAD_ON_QUERY is load-only"));
        }
        Ok(())
    }
}
