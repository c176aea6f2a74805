//! 抓取流程：阅读器会话 → 原始数据文件。
//!
//! 逐章切换、等待、取回状态并写入原文；章节全部完成后统一下载图片和封面。
//! 会话是单一的有状态资源，章节之间严格串行。

use std::collections::HashSet;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use super::fetcher::{AssetFetch, fetch_asset};
use super::progress::ChapterProgress;
use super::source::{BookListing, ContentSource, Readiness, SourceError};
use crate::base_system::context::safe_fs_name;
use crate::base_system::report::{Notice, Reporter};
use crate::book_parser::normalizer;
use crate::rdata::model::{COVER_NAME, asset_name, full_resolution_cover};
use crate::rdata::{ArchiveError, RawArchiveWriter};

pub const RDATA_SUFFIX: &str = ".rdata.zip";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("目标文件已存在: {}", path.display())]
    OutputExists { path: PathBuf },
    #[error("无法保存 {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ExtractError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ExtractError::Source(SourceError::TitleNotFound { .. }) => 6,
            ExtractError::Source(SourceError::Payload { .. }) => 5,
            ExtractError::Archive(e) => e.exit_code(),
            _ => 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub save_dir: PathBuf,
    /// 内容源不给就绪信号时，切换章节后的等待时间。
    pub settle_delay: Duration,
    pub verbose: bool,
    pub allow_overwrite: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub chapters_saved: usize,
    pub chapters_missing: usize,
    pub assets_saved: usize,
    pub assets_failed: usize,
}

/// `<save_dir>/<书名>.rdata.zip`
pub fn output_path(save_dir: &Path, title: &str) -> PathBuf {
    save_dir.join(format!("{}{RDATA_SUFFIX}", safe_fs_name(title, "_", 120)))
}

/// 按书名下载整本书，返回写入的原始数据文件路径。
///
/// 书名不存在时在创建任何文件之前失败。
pub async fn download<S, F>(
    source: &mut S,
    fetcher: &F,
    name: &str,
    options: &ExtractOptions,
    reporter: &dyn Reporter,
) -> Result<(PathBuf, ExtractSummary), ExtractError>
where
    S: ContentSource + ?Sized,
    F: AssetFetch + ?Sized,
{
    let listing = source.open_book(name).await?;
    let output = output_path(&options.save_dir, &listing.book_info.title);
    if output.exists() && !options.allow_overwrite {
        return Err(ExtractError::OutputExists { path: output });
    }
    std::fs::create_dir_all(&options.save_dir)?;
    info!(
        target: "download",
        title = %listing.book_info.title,
        chapters = listing.chapter_infos.len(),
        "开始下载"
    );

    let tmp = NamedTempFile::new_in(&options.save_dir)?;
    let mut writer = RawArchiveWriter::new(tmp);
    let progress = ChapterProgress::new(listing.chapter_infos.len(), !options.verbose);
    let summary = extract_into(
        source,
        fetcher,
        &listing,
        &mut writer,
        options,
        reporter,
        &progress,
    )
    .await;
    progress.finish();
    let summary = summary?;

    let tmp = writer.finish()?;
    tmp.persist(&output)
        .map_err(|source| ExtractError::Persist {
            path: output.clone(),
            source,
        })?;
    info!(target: "download", path = %output.display(), "原始数据已保存");
    Ok((output, summary))
}

/// 抓取全部章节与图片写入 `writer`，不负责落盘。
pub async fn extract_into<S, F, W>(
    source: &mut S,
    fetcher: &F,
    listing: &BookListing,
    writer: &mut RawArchiveWriter<W>,
    options: &ExtractOptions,
    reporter: &dyn Reporter,
    progress: &ChapterProgress,
) -> Result<ExtractSummary, ExtractError>
where
    S: ContentSource + ?Sized,
    F: AssetFetch + ?Sized,
    W: Write + Seek,
{
    let mut summary = ExtractSummary::default();
    let mut seen = HashSet::new();
    let mut asset_urls = Vec::new();
    let mut stylesheet: Option<String> = None;
    let total = listing.chapter_infos.len();

    for (index, chapter) in listing.chapter_infos.iter().enumerate() {
        progress.set_message(&chapter.title);
        match source.switch_chapter(&chapter.chapter_uid).await {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::Unsignalled) => {
                if !options.settle_delay.is_zero() {
                    tokio::time::sleep(options.settle_delay).await;
                }
            }
            Err(SourceError::UnknownChapter { uid }) => {
                debug!(target: "download", %uid, "chapter unavailable, skipped");
                reporter.notice(Notice::MissingChapter {
                    entry: chapter.entry_name(),
                });
                summary.chapters_missing += 1;
                progress.inc();
                continue;
            }
            Err(err) => return Err(err.into()),
        }

        let payload = source.current_payload().await?;
        if payload.uid() != &chapter.chapter_uid {
            reporter.notice(Notice::ChapterMismatch {
                requested: chapter.chapter_uid.to_string(),
                received: payload.uid().to_string(),
            });
        }

        let fragment = payload.fragment();
        match normalizer::image_urls(&fragment) {
            Ok(urls) => {
                for url in urls {
                    if seen.insert(url.clone()) {
                        asset_urls.push(url);
                    }
                }
            }
            Err(err) => reporter.notice(Notice::UnreadableChapter {
                entry: chapter.entry_name(),
                reason: err.to_string(),
            }),
        }
        writer.write_chapter(payload.uid(), &fragment)?;
        if stylesheet.is_none() && !payload.styles().trim().is_empty() {
            stylesheet = Some(payload.styles().to_string());
        }

        summary.chapters_saved += 1;
        progress.inc();
        if options.verbose {
            reporter.notice(Notice::ChapterSaved {
                index: index + 1,
                total,
            });
        }
    }

    writer.write_book_info(&listing.book_info)?;
    writer.write_toc(&listing.chapter_infos)?;
    if let Some(css) = stylesheet {
        writer.write_shared_stylesheet(&css)?;
    }

    let cover_url = full_resolution_cover(&listing.book_info.cover);
    let assets = asset_urls
        .iter()
        .filter_map(|url| asset_name(url).map(|name| (url.as_str(), name)))
        .chain(std::iter::once((cover_url.as_str(), COVER_NAME.to_string())));
    let mut attempted = HashSet::new();
    for (url, name) in assets {
        if !attempted.insert(name.clone()) {
            continue;
        }
        if fetch_asset(fetcher, url, &name, writer, reporter).await? {
            summary.assets_saved += 1;
        } else {
            summary.assets_failed += 1;
        }
    }

    debug!(target: "download", ?summary, "extraction finished");
    Ok(summary)
}
