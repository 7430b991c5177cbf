use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// 缓存链共用的错误类型。
///
/// 链路传播语义（见 layer/chain.rs）：
/// - NotFound 不是硬错误：触发向下一层转发；
/// - Unsupported 来自批量 store 时由链路引擎透明回退为逐条 store；
/// - 向下传播 / promotion 的失败只记日志，不覆盖本层已得结果。
#[derive(Debug, Error)]
pub enum CacheError {
    /// 整条可达链上都没有该键
    #[error("entry not found")]
    NotFound,

    /// 入参校验失败（零长 payload、buffer 尺寸不符、非法策略位组合）
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// 该层未实现此操作（目前只有批量 store）
    #[error("operation not supported")]
    Unsupported,

    /// 工作缓冲分配失败
    #[error("allocation failed ({0} bytes)")]
    OutOfMemory(usize),

    /// 归档记录校验和不匹配
    #[error("archive record corrupted at ordinal {0}")]
    Corrupted(u64),

    #[error("archive i/o: {0}")]
    Io(#[from] std::io::Error),
}
