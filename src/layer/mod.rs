pub mod archive;
pub mod chain;
pub mod memory;

pub use archive::*;
pub use chain::*;
pub use memory::*;
