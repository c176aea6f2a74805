//! 阅读器会话（内容源）。
//!
//! 实际的浏览器登录与页面驱动不在本 crate 内；这里只定义下载流程需要的
//! 三个能力，以及一个回放录制数据的实现 [`SnapshotSource`]。

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::rdata::model::{BookInfo, ChapterInfo, ChapterPayload, ChapterUid};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("没有找到你想要下载的《{name}》, 请检查你是否拥有这本书或书名是否正确!")]
    TitleNotFound { name: String },
    #[error("阅读器中没有章节 {uid}")]
    UnknownChapter { uid: String },
    #[error("尚未打开图书")]
    NoBookOpen,
    #[error("读取 {} 失败: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{} 不是合法的阅读器状态: {source}", path.display())]
    Payload {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 切换章节后内容是否已就绪。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// 内容源确认已渲染完成。
    Ready,
    /// 内容源无法给出信号，调用方按配置等待。
    Unsignalled,
}

/// 打开图书后阅读器给出的全书信息。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookListing {
    pub book_info: BookInfo,
    pub chapter_infos: Vec<ChapterInfo>,
}

#[async_trait]
pub trait ContentSource: Send {
    /// 在书架中按书名（子串匹配）打开图书。
    async fn open_book(&mut self, name: &str) -> Result<BookListing, SourceError>;

    /// 切换到指定章节。一次只能有一个切换在进行。
    async fn switch_chapter(&mut self, uid: &ChapterUid) -> Result<Readiness, SourceError>;

    /// 当前章节的阅读器状态。
    async fn current_payload(&mut self) -> Result<ChapterPayload, SourceError>;
}

/// 回放事先录制的阅读器状态。
///
/// 目录结构：
/// ```text
/// <dir>/reader.json             打开图书时的状态（bookInfo / chapterInfos）
/// <dir>/chapters/{uid}.json     切换到该章后的完整状态
/// ```
///
/// 录制时正文尚未渲染（`chapterContentHtml` 为空）的章节没有就绪信号，
/// 切换时返回 [`Readiness::Unsignalled`]。
pub struct SnapshotSource {
    root: PathBuf,
    opened: bool,
    current: Option<ChapterUid>,
}

impl SnapshotSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            opened: false,
            current: None,
        }
    }

    fn chapter_path(&self, uid: &ChapterUid) -> PathBuf {
        self.root.join("chapters").join(format!("{uid}.json"))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SourceError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| SourceError::Payload {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl ContentSource for SnapshotSource {
    async fn open_book(&mut self, name: &str) -> Result<BookListing, SourceError> {
        let listing: BookListing = read_json(&self.root.join("reader.json")).await?;
        let name = name.trim();
        if name.is_empty() || !listing.book_info.title.contains(name) {
            return Err(SourceError::TitleNotFound {
                name: name.to_string(),
            });
        }
        debug!(
            target: "download",
            title = %listing.book_info.title,
            chapters = listing.chapter_infos.len(),
            "snapshot opened"
        );
        self.opened = true;
        Ok(listing)
    }

    async fn switch_chapter(&mut self, uid: &ChapterUid) -> Result<Readiness, SourceError> {
        if !self.opened {
            return Err(SourceError::NoBookOpen);
        }
        let path = self.chapter_path(uid);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SourceError::UnknownChapter {
                uid: uid.to_string(),
            });
        }
        let payload: ChapterPayload = read_json(&path).await?;
        self.current = Some(uid.clone());
        if payload.chapter_content_html.is_empty() {
            Ok(Readiness::Unsignalled)
        } else {
            Ok(Readiness::Ready)
        }
    }

    async fn current_payload(&mut self) -> Result<ChapterPayload, SourceError> {
        let uid = self.current.as_ref().ok_or(SourceError::NoBookOpen)?;
        read_json(&self.chapter_path(uid)).await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::reader_state;
    use super::*;

    fn write_snapshot(dir: &Path) {
        let chapters = [(1, "第一章"), (2, "第二章")];
        std::fs::create_dir_all(dir.join("chapters")).unwrap();
        std::fs::write(
            dir.join("reader.json"),
            reader_state(1, &["<p>一</p>"], &chapters).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join("chapters/1.json"),
            reader_state(1, &["<p>一</p>"], &chapters).to_string(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn snapshot_replays_recorded_chapters() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        let mut source = SnapshotSource::new(dir.path());

        let listing = source.open_book("怦然").await.unwrap();
        assert_eq!(listing.chapter_infos.len(), 2);

        let ready = source.switch_chapter(&ChapterUid::Number(1)).await.unwrap();
        assert_eq!(ready, Readiness::Ready);
        let payload = source.current_payload().await.unwrap();
        assert_eq!(payload.fragment(), "<p>一</p>");

        let err = source
            .switch_chapter(&ChapterUid::Number(2))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::UnknownChapter { .. }));
    }

    #[tokio::test]
    async fn unrendered_chapter_has_no_readiness_signal() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        std::fs::write(
            dir.path().join("chapters/2.json"),
            reader_state(2, &[], &[(1, "第一章"), (2, "第二章")]).to_string(),
        )
        .unwrap();
        let mut source = SnapshotSource::new(dir.path());
        source.open_book("怦然").await.unwrap();

        let ready = source.switch_chapter(&ChapterUid::Number(2)).await.unwrap();
        assert_eq!(ready, Readiness::Unsignalled);
        assert_eq!(source.current_payload().await.unwrap().fragment(), "");
    }

    #[tokio::test]
    async fn unknown_title_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        let mut source = SnapshotSource::new(dir.path());
        let err = source.open_book("三体").await.unwrap_err();
        assert!(matches!(err, SourceError::TitleNotFound { ref name } if name == "三体"));
    }

    #[tokio::test]
    async fn switching_before_open_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        let mut source = SnapshotSource::new(dir.path());
        let err = source
            .switch_chapter(&ChapterUid::Number(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NoBookOpen));
    }
}
