use xxhash_rust::xxh3::{xxh3_128, Xxh3};

/// 128-bit 缓存键。由调用方提供：内容摘要或逻辑 ID 的派生值。
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Hash128 {
    pub value: u128,
}

/// 内存索引与归档条目头共用的定宽键编码（小端，无损可逆）。
pub type EntryKey = [u8; 16];

impl Hash128 {
    pub fn new(value: u128) -> Self {
        Self { value }
    }

    /// 从任意字节 blob 一次性派生键（xxh3-128）。
    pub fn from_blob(data: &[u8]) -> Self {
        Self {
            value: xxh3_128(data),
        }
    }

    pub fn entry_key(&self) -> EntryKey {
        self.value.to_le_bytes()
    }

    pub fn from_entry_key(key: &EntryKey) -> Self {
        Self {
            value: u128::from_le_bytes(*key),
        }
    }
}

/// 流式摘要上下文：分块喂入，结束时得到 Hash128。
/// 仅作为不透明键源使用，不提供密码学保证。
pub struct KeyHasher {
    inner: Xxh3,
}

impl KeyHasher {
    pub fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(&self) -> Hash128 {
        Hash128 {
            value: self.inner.digest128(),
        }
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}
