//! 原始数据文件写入。只追加，同名条目只写一次。

use std::collections::HashSet;
use std::io::{Seek, Write};

use tracing::debug;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use super::error::ArchiveError;
use super::model::{
    BookInfo, CONTENT_JSON, ChapterInfo, ChapterUid, SHARED_STYLESHEET, TOC_JSON, chapter_entry,
    image_entry,
};

pub struct RawArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    written: HashSet<String>,
}

impl<W: Write + Seek> RawArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            written: HashSet::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.written.contains(name)
    }

    /// 写入一个条目；已存在时跳过并返回 `false`。
    pub fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<bool, ArchiveError> {
        if self.written.contains(name) {
            debug!(target: "rdata", name, "entry already written, skipped");
            return Ok(false);
        }
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip.start_file(name, options)?;
        self.zip.write_all(data)?;
        self.written.insert(name.to_string());
        Ok(true)
    }

    pub fn write_book_info(&mut self, info: &BookInfo) -> Result<bool, ArchiveError> {
        let json = serde_json::to_vec(info).map_err(|source| ArchiveError::Metadata {
            name: CONTENT_JSON.to_string(),
            source,
        })?;
        self.write_entry(CONTENT_JSON, &json)
    }

    pub fn write_toc(&mut self, chapters: &[ChapterInfo]) -> Result<bool, ArchiveError> {
        let json = serde_json::to_vec(chapters).map_err(|source| ArchiveError::Metadata {
            name: TOC_JSON.to_string(),
            source,
        })?;
        self.write_entry(TOC_JSON, &json)
    }

    pub fn write_chapter(&mut self, uid: &ChapterUid, fragment: &str) -> Result<bool, ArchiveError> {
        self.write_entry(&chapter_entry(uid), fragment.as_bytes())
    }

    pub fn write_shared_stylesheet(&mut self, css: &str) -> Result<bool, ArchiveError> {
        self.write_entry(SHARED_STYLESHEET, css.as_bytes())
    }

    pub fn write_image(&mut self, name: &str, data: &[u8]) -> Result<bool, ArchiveError> {
        self.write_entry(&image_entry(name), data)
    }

    pub fn finish(mut self) -> Result<W, ArchiveError> {
        Ok(self.zip.finish()?)
    }
}
