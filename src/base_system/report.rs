//! 诊断信息出口。
//!
//! 核心流程不直接写全局日志，而是把需要用户看到的事件交给调用方注入的
//! [`Reporter`]。命令行使用 [`TracingReporter`]，测试使用 [`MemoryReporter`]
//! 收集后断言。

use std::fmt;

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// `toc.json` 列出的章节在 `Text/` 下没有对应条目。
    MissingChapter { entry: String },
    /// 章节引用的图片（或封面）在 `Images/` 下没有对应条目。
    MissingImage { entry: String },
    /// 章节片段无法解析。
    UnreadableChapter { entry: String, reason: String },
    /// 图片下载失败，已跳过。
    AssetFetchFailed { url: String, reason: String },
    /// 阅读器返回的章节与请求的不一致。
    ChapterMismatch { requested: String, received: String },
    /// 导航中跳过了没有正文的章节。
    NavigationSkipped { uid: String, title: String },
    /// 一章抓取完成（仅 verbose）。
    ChapterSaved { index: usize, total: usize },
}

impl Notice {
    pub fn is_warning(&self) -> bool {
        !matches!(self, Notice::ChapterSaved { .. })
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::MissingChapter { entry } => write!(f, "文件 {entry} 未找到!"),
            Notice::MissingImage { entry } => write!(f, "图片 {entry} 未找到!"),
            Notice::UnreadableChapter { entry, reason } => {
                write!(f, "章节 {entry} 无法解析: {reason}")
            }
            Notice::AssetFetchFailed { url, reason } => {
                write!(f, "图片下载失败 {url}: {reason}")
            }
            Notice::ChapterMismatch {
                requested,
                received,
            } => write!(f, "请求章节 {requested}，阅读器返回章节 {received}"),
            Notice::NavigationSkipped { uid, title } => {
                write!(f, "章节《{title}》({uid}) 没有正文，已从导航中省略")
            }
            Notice::ChapterSaved { index, total } => write!(f, "第{index}/{total}章下载完成."),
        }
    }
}

pub trait Reporter: Send + Sync {
    fn notice(&self, notice: Notice);
}

/// 转发到 tracing。
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn notice(&self, notice: Notice) {
        if notice.is_warning() {
            warn!(target: "report", "{notice}");
        } else {
            info!(target: "report", "{notice}");
        }
    }
}

/// 收集全部事件，供测试断言。
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryReporter {
    notices: std::sync::Mutex<Vec<Notice>>,
}

#[cfg(test)]
impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(Notice::is_warning)
            .collect()
    }
}

#[cfg(test)]
impl Reporter for MemoryReporter {
    fn notice(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reporter_separates_progress_from_warnings() {
        let reporter = MemoryReporter::new();
        reporter.notice(Notice::ChapterSaved { index: 1, total: 2 });
        reporter.notice(Notice::MissingImage {
            entry: "Images/coverpage.jpg".into(),
        });
        assert_eq!(reporter.notices().len(), 2);
        assert_eq!(
            reporter.warnings(),
            vec![Notice::MissingImage {
                entry: "Images/coverpage.jpg".into()
            }]
        );
    }

    #[test]
    fn notices_render_entry_names() {
        let text = Notice::MissingChapter {
            entry: "Text/chapter-3.html".into(),
        }
        .to_string();
        assert!(text.contains("Text/chapter-3.html"));
    }
}
