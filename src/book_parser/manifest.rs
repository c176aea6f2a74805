//! `content.opf` 与 `toc.ncx` 生成。
//!
//! 清单（manifest）和阅读顺序（spine）来自原始数据文件的物理条目列表，
//! 导航（navMap）来自 `toc.json` 的章节顺序。两者互不影响。

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::OnceLock;

use quick_xml::escape::escape;
use regex::Regex;
use time::PrimitiveDateTime;
use time::macros::format_description;
use tracing::debug;

use crate::base_system::report::{Notice, Reporter};
use crate::rdata::ArchiveError;
use crate::rdata::model::{BookInfo, COVER_NAME, ChapterInfo, EntryKind, IMAGES_DIR, chapter_entry};

pub const CONTENT_OPF: &str = "content.opf";
pub const TOC_NCX: &str = "toc.ncx";
pub const COVER_DOCUMENT: &str = "Text/coverpage.xhtml";
pub const BOOK_ID_REF: &str = "weread-book-id";

const IBOOKS_PREFIX: &str =
    "ibooks: http://vocabulary.itunes.apple.com/rdf/ibooks/vocabulary-extensions-1.0/";
const NCX_ID: &str = "ncx";
const COVER_DOCUMENT_ID: &str = "text-coverpage";

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// 条目排序：先按去掉全部数字后的名字分组，再按第一段数字的数值，最后按原名。
pub fn compare_entries(a: &str, b: &str) -> Ordering {
    let group_a = digits_re().replace_all(a, "");
    let group_b = digits_re().replace_all(b, "");
    group_a
        .cmp(&group_b)
        .then_with(|| compare_index(first_number(a), first_number(b)))
        .then_with(|| a.cmp(b))
}

pub fn sort_entries(names: &mut [String]) {
    names.sort_by(|a, b| compare_entries(a, b));
}

fn first_number(name: &str) -> Option<&str> {
    digits_re().find(name).map(|m| m.as_str())
}

/// 任意长度的十进制数字串按数值比较，不经过整数转换。
fn compare_index(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let a = a.trim_start_matches('0');
            let b = b.trim_start_matches('0');
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
    }
}

/// 原始条目名 → 包内路径（`.html` 章节改为 `.xhtml`）。
pub fn package_href(entry: &str) -> String {
    match entry.strip_suffix(".html") {
        Some(stem) if EntryKind::of(entry) == EntryKind::Text => format!("{stem}.xhtml"),
        _ => entry.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: &'static str,
    pub properties: Option<&'static str>,
    /// 对应的原始条目；合成条目（封面页、ncx）为 `None`。
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageManifest {
    pub items: Vec<ManifestItem>,
    /// 阅读顺序，元素为 item id。
    pub spine: Vec<String>,
}

impl PackageManifest {
    /// 章节文档：`(原始条目, 包内路径)`，按阅读顺序。
    pub fn documents(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|item| {
            let source = item.source.as_deref()?;
            (EntryKind::of(source) == EntryKind::Text).then_some((source, item.href.as_str()))
        })
    }

    /// 原样复制的资源（样式表与图片）。
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| {
            let source = item.source.as_deref()?;
            matches!(EntryKind::of(source), EntryKind::Image | EntryKind::Style).then_some(source)
        })
    }

    pub fn stylesheets(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|item| item.media_type == "text/css")
            .map(|item| item.href.as_str())
    }

    pub fn contains_href(&self, href: &str) -> bool {
        self.items.iter().any(|item| item.href == href)
    }
}

fn manifest_id(prefix: &str, entry: &str, used: &mut HashSet<String>) -> String {
    let file = entry.rsplit('/').next().unwrap_or(entry);
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    let clean: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let base = format!("{prefix}-{clean}");
    let mut id = base.clone();
    let mut n = 2;
    while !used.insert(id.clone()) {
        id = format!("{base}-{n}");
        n += 1;
    }
    id
}

/// 从物理条目列表构建清单与阅读顺序。
pub fn build_manifest(entry_names: &[String]) -> PackageManifest {
    let mut names: Vec<String> = entry_names
        .iter()
        .filter(|name| {
            matches!(
                EntryKind::of(name),
                EntryKind::Image | EntryKind::Style | EntryKind::Text
            )
        })
        .cloned()
        .collect();
    sort_entries(&mut names);

    let mut used: HashSet<String> = [COVER_DOCUMENT_ID.to_string(), NCX_ID.to_string()]
        .into_iter()
        .collect();
    let mut manifest = PackageManifest::default();
    manifest.spine.push(COVER_DOCUMENT_ID.to_string());

    let cover_image = format!("{IMAGES_DIR}{COVER_NAME}.jpg");
    for name in names {
        let href = package_href(&name);
        if href == COVER_DOCUMENT {
            debug!(target: "epub", entry = %name, "entry clashes with cover page, skipped");
            continue;
        }
        let (prefix, media_type) = match EntryKind::of(&name) {
            EntryKind::Image => ("image", "image/jpeg"),
            EntryKind::Style => ("style", "text/css"),
            _ => ("text", "application/xhtml+xml"),
        };
        let id = manifest_id(prefix, &name, &mut used);
        if prefix == "text" {
            manifest.spine.push(id.clone());
        }
        manifest.items.push(ManifestItem {
            id,
            href,
            media_type,
            properties: (name == cover_image).then_some("cover-image"),
            source: Some(name),
        });
    }

    manifest.items.push(ManifestItem {
        id: COVER_DOCUMENT_ID.to_string(),
        href: COVER_DOCUMENT.to_string(),
        media_type: "application/xhtml+xml",
        properties: None,
        source: None,
    });
    manifest.items.push(ManifestItem {
        id: NCX_ID.to_string(),
        href: TOC_NCX.to_string(),
        media_type: "application/x-dtbncx+xml",
        properties: None,
        source: None,
    });
    manifest
}

/// `YYYY-MM-DD HH:MM:SS` → `YYYY-MM-DDTHH:MM:SSZ`
pub fn iso_publish_date(publish_time: &str) -> Result<String, ArchiveError> {
    let invalid = || ArchiveError::InvalidField {
        field: "publishTime",
        value: publish_time.to_string(),
    };
    let parsed = PrimitiveDateTime::parse(
        publish_time.trim(),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .map_err(|_| invalid())?;
    parsed
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .map_err(|_| invalid())
}

pub fn content_opf(
    book: &BookInfo,
    manifest: &PackageManifest,
    language: &str,
) -> Result<String, ArchiveError> {
    let date = iso_publish_date(&book.publish_time)?;
    let title = escape(book.title.as_str());
    let author = escape(book.author.as_str());

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let _ = writeln!(
        out,
        "<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"{BOOK_ID_REF}\" prefix=\"{IBOOKS_PREFIX}\" xml:lang=\"{}\">",
        escape(language)
    );
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n");
    let _ = writeln!(
        out,
        "    <dc:identifier id=\"{BOOK_ID_REF}\">{}</dc:identifier>",
        escape(book.book_id.as_str())
    );
    let _ = writeln!(out, "    <dc:title>{title}</dc:title>");
    let _ = writeln!(out, "    <dc:language>{}</dc:language>", escape(language));
    let _ = writeln!(
        out,
        "    <dc:creator opf:file-as=\"{author}\" opf:role=\"aut\">{author}</dc:creator>"
    );
    if let Some(translator) = book.translator() {
        let _ = writeln!(
            out,
            "    <dc:contributor opf:role=\"trl\">{}</dc:contributor>",
            escape(translator)
        );
    }
    let _ = writeln!(out, "    <dc:date>{date}</dc:date>");
    let _ = writeln!(
        out,
        "    <dc:source id=\"src-id\">urn:isbn:{}</dc:source>",
        escape(book.isbn.as_str())
    );
    let _ = writeln!(
        out,
        "    <dc:publisher>{}</dc:publisher>",
        escape(book.publisher.as_str())
    );
    let _ = writeln!(
        out,
        "    <dc:description>{}</dc:description>",
        escape(book.intro.as_str())
    );
    let _ = writeln!(
        out,
        "    <meta name=\"cover\" content=\"image-{COVER_NAME}\"/>"
    );
    // Apple Books 默认替换书内字体，声明后才使用内嵌样式。
    out.push_str("    <meta property=\"ibooks:specified-fonts\">true</meta>\n");
    out.push_str("  </metadata>\n");

    out.push_str("  <manifest>\n");
    for item in &manifest.items {
        let _ = write!(
            out,
            "    <item href=\"{}\" id=\"{}\" media-type=\"{}\"",
            escape(item.href.as_str()),
            escape(item.id.as_str()),
            item.media_type
        );
        if let Some(properties) = item.properties {
            let _ = write!(out, " properties=\"{properties}\"");
        }
        out.push_str("/>\n");
    }
    out.push_str("  </manifest>\n");

    let _ = writeln!(out, "  <spine toc=\"{NCX_ID}\">");
    for idref in &manifest.spine {
        let _ = writeln!(out, "    <itemref idref=\"{}\"/>", escape(idref.as_str()));
    }
    out.push_str("  </spine>\n");

    out.push_str("  <guide>\n");
    let _ = writeln!(
        out,
        "    <reference type=\"cover\" title=\"{title}\" href=\"{COVER_DOCUMENT}\"/>"
    );
    out.push_str("  </guide>\n");
    out.push_str("</package>\n");
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    pub play_order: usize,
    pub title: String,
    pub src: String,
}

/// 按 `toc.json` 顺序生成导航项；没有正文条目的章节跳过，播放序号保持连续。
/// 跳过的章节只在 `verbose` 时上报。
pub fn nav_points(
    toc: &[ChapterInfo],
    entry_names: &[String],
    verbose: bool,
    reporter: &dyn Reporter,
) -> Vec<NavPoint> {
    let present: HashSet<&str> = entry_names.iter().map(String::as_str).collect();
    let mut points = Vec::with_capacity(toc.len());
    for chapter in toc {
        let entry = chapter_entry(&chapter.chapter_uid);
        if !present.contains(entry.as_str()) {
            if verbose {
                reporter.notice(Notice::NavigationSkipped {
                    uid: chapter.chapter_uid.to_string(),
                    title: chapter.title.clone(),
                });
            } else {
                debug!(
                    target: "epub",
                    uid = %chapter.chapter_uid,
                    "chapter without text skipped in navigation"
                );
            }
            continue;
        }
        points.push(NavPoint {
            play_order: points.len() + 1,
            title: chapter.title.clone(),
            src: package_href(&entry),
        });
    }
    points
}

pub fn toc_ncx(book: &BookInfo, points: &[NavPoint], language: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let _ = writeln!(
        out,
        "<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\" xml:lang=\"{}\">",
        escape(language)
    );
    out.push_str("  <head>\n");
    let _ = writeln!(
        out,
        "    <meta name=\"dtb:uid\" content=\"{}\"/>",
        escape(book.book_id.as_str())
    );
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\"/>\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n");
    out.push_str("  </head>\n");
    let _ = writeln!(
        out,
        "  <docTitle>\n    <text>{}</text>\n  </docTitle>",
        escape(book.title.as_str())
    );
    out.push_str("  <navMap>\n");
    for point in points {
        let _ = writeln!(
            out,
            "    <navPoint id=\"np-{order}\" playOrder=\"{order}\">",
            order = point.play_order
        );
        let _ = writeln!(
            out,
            "      <navLabel>\n        <text>{}</text>\n      </navLabel>",
            escape(point.title.as_str())
        );
        let _ = writeln!(
            out,
            "      <content src=\"{}\"/>",
            escape(point.src.as_str())
        );
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

/// 一次生成的全部交叉引用文档。
#[derive(Debug, Clone)]
pub struct PackageDocuments {
    pub manifest: PackageManifest,
    pub nav_points: Vec<NavPoint>,
    pub content_opf: String,
    pub toc_ncx: String,
}

pub fn generate(
    book: &BookInfo,
    toc: &[ChapterInfo],
    entry_names: &[String],
    language: &str,
    verbose: bool,
    reporter: &dyn Reporter,
) -> Result<PackageDocuments, ArchiveError> {
    let manifest = build_manifest(entry_names);
    let content_opf = content_opf(book, &manifest, language)?;
    let nav_points = nav_points(toc, entry_names, verbose, reporter);
    let toc_ncx = toc_ncx(book, &nav_points, language);
    debug!(
        target: "epub",
        items = manifest.items.len(),
        nav = nav_points.len(),
        "package documents generated"
    );
    Ok(PackageDocuments {
        manifest,
        nav_points,
        content_opf,
        toc_ncx,
    })
}
