//! 原始数据文件（`*.rdata.zip`）：抓取流程的产物，EPUB 生成的唯一输入。

pub mod error;
pub mod model;
pub mod reader;
pub mod writer;

pub use error::ArchiveError;
pub use reader::RawArchive;
pub use writer::RawArchiveWriter;
