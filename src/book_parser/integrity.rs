//! 原始数据文件完整性检查。
//!
//! `toc.json` 中每一章都要有 `Text/chapter-{uid}.html`，章节引用的每张图片
//! （以及封面 `coverpage`）都要有 `Images/{name}.jpg`。只读，不修改文件。

use std::collections::{BTreeSet, HashSet};
use std::io::{Read, Seek};
use std::path::Path;

use tracing::debug;

use super::normalizer;
use crate::base_system::report::{Notice, Reporter};
use crate::rdata::model::{COVER_NAME, asset_name, image_entry};
use crate::rdata::{ArchiveError, RawArchive};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub chapters_checked: usize,
    pub missing_chapters: Vec<String>,
    pub unreadable_chapters: Vec<String>,
    pub missing_images: Vec<String>,
}

impl IntegrityReport {
    pub fn is_complete(&self) -> bool {
        self.missing_chapters.is_empty()
            && self.unreadable_chapters.is_empty()
            && self.missing_images.is_empty()
    }
}

pub fn check(
    path: &Path,
    verbose: bool,
    reporter: &dyn Reporter,
) -> Result<IntegrityReport, ArchiveError> {
    let mut archive = RawArchive::open(path)?;
    check_archive(&mut archive, verbose, reporter)
}

/// 逐章检查正文，再统一检查图片。verbose 时逐条上报缺失项。
pub fn check_archive<R: Read + Seek>(
    archive: &mut RawArchive<R>,
    verbose: bool,
    reporter: &dyn Reporter,
) -> Result<IntegrityReport, ArchiveError> {
    let toc = archive.toc()?;
    let mut report = IntegrityReport::default();
    let mut assets = BTreeSet::new();

    for chapter in &toc {
        let entry = chapter.entry_name();
        report.chapters_checked += 1;
        let Some(fragment) = archive.read_text(&entry)? else {
            if verbose {
                reporter.notice(Notice::MissingChapter {
                    entry: entry.clone(),
                });
            }
            report.missing_chapters.push(entry);
            continue;
        };
        match normalizer::image_urls(&fragment) {
            Ok(urls) => assets.extend(urls.iter().filter_map(|url| asset_name(url))),
            Err(err) => {
                if verbose {
                    reporter.notice(Notice::UnreadableChapter {
                        entry: entry.clone(),
                        reason: err.to_string(),
                    });
                }
                report.unreadable_chapters.push(entry);
            }
        }
    }

    assets.insert(COVER_NAME.to_string());
    let present: HashSet<&str> = archive.entry_names().iter().map(String::as_str).collect();
    for name in &assets {
        let entry = image_entry(name);
        if present.contains(entry.as_str()) {
            continue;
        }
        if verbose {
            reporter.notice(Notice::MissingImage {
                entry: entry.clone(),
            });
        }
        report.missing_images.push(entry);
    }

    debug!(
        target: "check",
        origin = %archive.origin().display(),
        chapters = report.chapters_checked,
        images = assets.len(),
        complete = report.is_complete(),
        "integrity check finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::base_system::report::MemoryReporter;
    use crate::rdata::RawArchiveWriter;
    use crate::rdata::model::{ChapterInfo, ChapterUid};

    struct Fixture {
        chapters: Vec<(u64, &'static str)>,
        toc: Vec<u64>,
        images: Vec<&'static str>,
    }

    impl Fixture {
        fn complete() -> Self {
            Self {
                chapters: vec![
                    (1, r#"<p><img data-src="https://res/a/pic1"/></p>"#),
                    (5, r#"<p><img data-src="https://res/a/pic2"/><img data-src="https://res/b/pic1"/></p>"#),
                ],
                toc: vec![1, 5],
                images: vec!["coverpage", "pic1", "pic2"],
            }
        }

        fn archive(&self) -> RawArchive<Cursor<Vec<u8>>> {
            let mut writer = RawArchiveWriter::new(Cursor::new(Vec::new()));
            let toc: Vec<ChapterInfo> = self
                .toc
                .iter()
                .map(|uid| ChapterInfo::new(*uid, "章"))
                .collect();
            writer.write_toc(&toc).unwrap();
            for (uid, html) in &self.chapters {
                writer.write_chapter(&ChapterUid::Number(*uid), html).unwrap();
            }
            for name in &self.images {
                writer.write_image(name, b"jpg").unwrap();
            }
            let cursor = writer.finish().unwrap();
            RawArchive::from_reader(Cursor::new(cursor.into_inner()), "mem").unwrap()
        }
    }

    #[test]
    fn complete_archive_passes() {
        let reporter = MemoryReporter::new();
        let report = check_archive(&mut Fixture::complete().archive(), true, &reporter).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.chapters_checked, 2);
        assert!(reporter.notices().is_empty());
    }

    #[test]
    fn missing_cover_reports_exactly_one_warning() {
        let mut fixture = Fixture::complete();
        fixture.images.retain(|n| *n != "coverpage");
        let reporter = MemoryReporter::new();
        let report = check_archive(&mut fixture.archive(), true, &reporter).unwrap();
        assert!(!report.is_complete());
        assert_eq!(
            reporter.warnings(),
            vec![Notice::MissingImage {
                entry: "Images/coverpage.jpg".into()
            }]
        );
    }

    #[test]
    fn quiet_mode_fails_without_notices() {
        let mut fixture = Fixture::complete();
        fixture.images.retain(|n| *n != "pic2");
        let reporter = MemoryReporter::new();
        let report = check_archive(&mut fixture.archive(), false, &reporter).unwrap();
        assert_eq!(report.missing_images, ["Images/pic2.jpg"]);
        assert!(reporter.notices().is_empty());
    }

    #[test]
    fn missing_chapter_is_recorded_and_scan_continues() {
        let mut fixture = Fixture::complete();
        fixture.toc = vec![1, 3, 5];
        let reporter = MemoryReporter::new();
        let report = check_archive(&mut fixture.archive(), true, &reporter).unwrap();
        assert_eq!(report.missing_chapters, ["Text/chapter-3.html"]);
        assert!(report.missing_images.is_empty());
        assert_eq!(report.chapters_checked, 3);
        assert_eq!(reporter.warnings().len(), 1);
    }

    #[test]
    fn loose_html_text_does_not_fail_the_check() {
        let mut fixture = Fixture::complete();
        fixture.chapters[0].1 =
            r#"<div><p>Tom & Jerry, 1 < 2</p><p><img data-src="https://res/x/pic1"/></p></div>"#;
        let reporter = MemoryReporter::new();
        let report = check_archive(&mut fixture.archive(), true, &reporter).unwrap();
        assert!(report.is_complete(), "{report:?}");
        assert!(reporter.notices().is_empty());

        fixture.images.retain(|n| *n != "pic1");
        let report = check_archive(&mut fixture.archive(), false, &reporter).unwrap();
        assert_eq!(report.missing_images, ["Images/pic1.jpg"]);
        assert!(report.unreadable_chapters.is_empty());
    }

    #[test]
    fn unreadable_chapter_fails_the_check() {
        let mut fixture = Fixture::complete();
        fixture.chapters[0].1 = r#"<p><img data-src="x"#;
        let report = check_archive(&mut fixture.archive(), false, &MemoryReporter::new()).unwrap();
        assert_eq!(report.unreadable_chapters, ["Text/chapter-1.html"]);
        assert!(!report.is_complete());
    }

    #[test]
    fn shared_asset_names_are_checked_once() {
        let mut fixture = Fixture::complete();
        fixture.images.retain(|n| *n != "pic1");
        let reporter = MemoryReporter::new();
        let report = check_archive(&mut fixture.archive(), true, &reporter).unwrap();
        assert_eq!(report.missing_images, ["Images/pic1.jpg"]);
        assert_eq!(reporter.warnings().len(), 1);
    }

    #[test]
    fn missing_toc_is_an_error() {
        let mut writer = RawArchiveWriter::new(Cursor::new(Vec::new()));
        writer.write_image("coverpage", b"jpg").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let mut archive = RawArchive::from_reader(Cursor::new(bytes), "mem").unwrap();
        let err = check_archive(&mut archive, true, &MemoryReporter::new()).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingEntry { .. }));
    }

    #[test]
    fn non_zip_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain text").unwrap();
        let err = check(&path, false, &MemoryReporter::new()).unwrap_err();
        assert_eq!(err.exit_code(), 4);

        let err = check(&dir.path().join("absent.rdata.zip"), false, &MemoryReporter::new())
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
