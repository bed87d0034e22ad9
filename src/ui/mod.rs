pub mod buffer;
pub mod logs;
pub mod summary;
