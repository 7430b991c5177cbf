pub mod error;
pub mod key;
pub mod policy;

pub use error::*;
pub use key::*;
pub use policy::*;
