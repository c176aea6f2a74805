//! 解析与导出模块入口。
//!
//! 负责把原始数据文件中的章节片段转换为 EPUB，并对原始数据文件做完整性检查。

pub mod epub_writer;
pub mod integrity;
pub mod manifest;
pub mod markup;
pub mod normalizer;
