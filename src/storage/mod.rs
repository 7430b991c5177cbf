pub mod archive_file;

pub use archive_file::*;
