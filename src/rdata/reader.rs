//! 原始数据文件读取。完整性检查和 EPUB 生成共用，只读不写。

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use super::error::ArchiveError;
use super::model::{BookInfo, CONTENT_JSON, ChapterInfo, TOC_JSON};

pub struct RawArchive<R = File> {
    archive: ZipArchive<R>,
    origin: PathBuf,
    names: Vec<String>,
}

impl RawArchive<File> {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ArchiveError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ArchiveError::Io(err),
        })?;
        Self::from_reader(file, path)
    }
}

impl<R: Read + Seek> RawArchive<R> {
    pub fn from_reader(reader: R, origin: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let origin = origin.into();
        // 任何无法识别为 zip 的输入（包括过短的文件）都归为非法容器。
        let mut archive = ZipArchive::new(reader).map_err(|source| ArchiveError::Invalid {
            path: origin.clone(),
            source,
        })?;

        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            names.push(entry.name().to_string());
        }
        debug!(target: "rdata", origin = %origin.display(), entries = names.len(), "opened rdata");

        Ok(Self {
            archive,
            origin,
            names,
        })
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// 全部文件条目，按中央目录顺序。
    pub fn entry_names(&self) -> &[String] {
        &self.names
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        // 头部声明的大小不可信，不据此预分配。
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    pub fn read_required(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.read(name)?.ok_or_else(|| ArchiveError::MissingEntry {
            name: name.to_string(),
        })
    }

    pub fn book_info(&mut self) -> Result<BookInfo, ArchiveError> {
        self.read_json(CONTENT_JSON)
    }

    pub fn toc(&mut self) -> Result<Vec<ChapterInfo>, ArchiveError> {
        self.read_json(TOC_JSON)
    }

    pub fn read_text(&mut self, name: &str) -> Result<Option<String>, ArchiveError> {
        Ok(self
            .read(name)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn read_json<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ArchiveError> {
        let bytes = self.read_required(name)?;
        serde_json::from_slice(&bytes).map_err(|source| ArchiveError::Metadata {
            name: name.to_string(),
            source,
        })
    }
}
