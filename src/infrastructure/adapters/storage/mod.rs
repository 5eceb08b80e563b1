//! Storage Adapter - 输出图片存储

mod file_storage;

pub use file_storage::FileImageStorage;
