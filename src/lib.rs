pub mod core;
pub mod layer;
pub mod stats;
pub mod storage;
