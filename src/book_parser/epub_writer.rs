//! EPUB 打包：原始数据文件 → `.epub`。
//!
//! 生成的包结构：
//! ```text
//! mimetype                  (不压缩，必须是第一个条目)
//! META-INF/container.xml
//! META-INF/com.apple.ibooks.display-options.xml
//! OEBPS/content.opf
//! OEBPS/toc.ncx
//! OEBPS/Text/*.xhtml        (章节 + 封面页)
//! OEBPS/Styles/*.css
//! OEBPS/Images/*.jpg
//! ```
//! 元信息缺失时在写入任何条目之前失败；输出经临时文件落盘，失败不留半成品。

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::result::ZipError;
use zip::write::FileOptions;

use super::manifest::{self, CONTENT_OPF, COVER_DOCUMENT, PackageDocuments, TOC_NCX};
use super::markup::MarkupError;
use super::normalizer;
use crate::base_system::report::Reporter;
use crate::rdata::model::{COVER_NAME, IMAGES_DIR, STYLES_DIR, TEXT_DIR};
use crate::rdata::{ArchiveError, RawArchive};

pub const MIMETYPE: &str = "application/epub+zip";
const OEBPS_DIR: &str = "OEBPS/";
const CONTAINER_XML: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<container xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\" version=\"1.0\">\n  \
<rootfiles>\n    \
<rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  \
</rootfiles>\n\
</container>\n";
const IBOOKS_OPTIONS_ENTRY: &str = "META-INF/com.apple.ibooks.display-options.xml";
const IBOOKS_OPTIONS_XML: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<display_options>\n  \
<platform name=\"*\">\n    \
<option name=\"specified-fonts\">true</option>\n  \
</platform>\n\
</display_options>\n";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("章节 {entry} 无法解析: {source}")]
    Chapter { entry: String, source: MarkupError },
    #[error("目标文件已存在: {}", path.display())]
    OutputExists { path: PathBuf },
    #[error("无法保存 {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PackageError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PackageError::Archive(e) => e.exit_code(),
            PackageError::Chapter { .. } => 7,
            _ => 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// `dc:language` 以及各文档的 `xml:lang`。
    pub language: String,
    pub allow_overwrite: bool,
    /// 上报导航中跳过的章节。
    pub verbose: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            language: "zh".to_string(),
            allow_overwrite: true,
            verbose: false,
        }
    }
}

/// `X.rdata.zip` → `X.epub`，与输入同目录。
pub fn default_output_path(input: &Path) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match file_name.strip_suffix(".rdata.zip") {
        Some(stem) => stem.to_string(),
        None => input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string()),
    };
    input.with_file_name(format!("{stem}.epub"))
}

/// 从原始数据文件生成 EPUB，返回实际写入的路径。
pub fn generate(
    input: &Path,
    output: Option<&Path>,
    options: &PackageOptions,
    reporter: &dyn Reporter,
) -> Result<PathBuf, PackageError> {
    let mut archive = RawArchive::open(input)?;
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));
    if output.exists() && !options.allow_overwrite {
        return Err(PackageError::OutputExists { path: output });
    }

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let tmp = NamedTempFile::new_in(&dir)?;
    let tmp = write_package(&mut archive, tmp, options, reporter)?;
    tmp.persist(&output)
        .map_err(|source| PackageError::Persist {
            path: output.clone(),
            source,
        })?;
    info!(target: "epub", path = %output.display(), "epub written");
    Ok(output)
}

/// 把整本书写入 `out` 并返回它。
pub fn write_package<R, W>(
    archive: &mut RawArchive<R>,
    out: W,
    options: &PackageOptions,
    reporter: &dyn Reporter,
) -> Result<W, PackageError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let book = archive.book_info()?;
    let toc = archive.toc()?;
    let docs = manifest::generate(
        &book,
        &toc,
        archive.entry_names(),
        &options.language,
        options.verbose,
        reporter,
    )?;
    let titles: HashMap<String, &str> = toc
        .iter()
        .map(|c| (c.entry_name(), c.title.as_str()))
        .collect();

    let mut zip = ZipWriter::new(out);
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE.as_bytes())?;
    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;
    zip.start_file(IBOOKS_OPTIONS_ENTRY, deflated)?;
    zip.write_all(IBOOKS_OPTIONS_XML.as_bytes())?;
    zip.start_file(format!("{OEBPS_DIR}{CONTENT_OPF}"), deflated)?;
    zip.write_all(docs.content_opf.as_bytes())?;
    zip.start_file(format!("{OEBPS_DIR}{TOC_NCX}"), deflated)?;
    zip.write_all(docs.toc_ncx.as_bytes())?;

    let mut chapters = 0usize;
    for (source, href) in docs.manifest.documents() {
        let Some(fragment) = archive.read_text(source)? else {
            continue;
        };
        let body = normalizer::normalize_to_xhtml(&fragment).map_err(|source_err| {
            PackageError::Chapter {
                entry: source.to_string(),
                source: source_err,
            }
        })?;
        let title = titles
            .get(source)
            .copied()
            .unwrap_or_else(|| fallback_title(source));
        let stylesheets = chapter_stylesheets(&docs, source);
        let xhtml = wrap_chapter_xhtml(title, &stylesheets, &body, &options.language);
        zip.start_file(format!("{OEBPS_DIR}{href}"), deflated)?;
        zip.write_all(xhtml.as_bytes())?;
        chapters += 1;
    }

    zip.start_file(format!("{OEBPS_DIR}{COVER_DOCUMENT}"), deflated)?;
    zip.write_all(cover_xhtml(&options.language).as_bytes())?;

    let mut resources = 0usize;
    for source in docs.manifest.resources() {
        let Some(data) = archive.read(source)? else {
            continue;
        };
        zip.start_file(format!("{OEBPS_DIR}{source}"), deflated)?;
        zip.write_all(&data)?;
        resources += 1;
    }

    debug!(
        target: "epub",
        chapters,
        resources,
        nav = docs.nav_points.len(),
        "package assembled"
    );
    Ok(zip.finish()?)
}

/// 章节页引用的样式表（相对 `Text/`）：
/// 存在 `Styles/chapter-{uid}.css` 时只用它，否则用全部共享样式表。
fn chapter_stylesheets(docs: &PackageDocuments, source: &str) -> Vec<String> {
    let own = source
        .strip_prefix(TEXT_DIR)
        .and_then(|f| f.strip_suffix(".html"))
        .map(|stem| format!("{STYLES_DIR}{stem}.css"));
    if let Some(own) = own
        && docs.manifest.contains_href(&own)
    {
        return vec![format!("../{own}")];
    }
    docs.manifest
        .stylesheets()
        .filter(|href| !is_chapter_stylesheet(href))
        .map(|href| format!("../{href}"))
        .collect()
}

fn is_chapter_stylesheet(href: &str) -> bool {
    href.strip_prefix(STYLES_DIR)
        .is_some_and(|file| file.starts_with("chapter-"))
}

fn fallback_title(source: &str) -> &str {
    let file = source.rsplit('/').next().unwrap_or(source);
    file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
}

fn wrap_chapter_xhtml(title: &str, stylesheets: &[String], body: &str, language: &str) -> String {
    let lang = escape(language);
    let links: String = stylesheets
        .iter()
        .map(|href| {
            format!(
                "    <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>\n",
                escape(href.as_str())
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"{lang}\" lang=\"{lang}\">\n  <head>\n    <meta charset=\"UTF-8\"/>\n    <title>{}</title>\n{links}  </head>\n  <body>\n    <div class=\"readerChapterContent\">{body}</div>\n  </body>\n</html>\n",
        escape(title)
    )
}

fn cover_xhtml(language: &str) -> String {
    let lang = escape(language);
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"{lang}\" lang=\"{lang}\">\n  <head>\n    <title>封面</title>\n  </head>\n  <body>\n    <div>\n      <img src=\"../{IMAGES_DIR}{COVER_NAME}.jpg\" alt=\"\"/>\n    </div>\n  </body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use zip::ZipArchive;

    use super::*;
    use crate::base_system::report::MemoryReporter;
    use crate::rdata::RawArchiveWriter;
    use crate::rdata::model::fixtures::book_info_json;
    use crate::rdata::model::{BookInfo, ChapterInfo, ChapterUid};

    fn build_rdata(with_content: bool, chapter: &str) -> Vec<u8> {
        let info: BookInfo = serde_json::from_value(book_info_json()).unwrap();
        let mut writer = RawArchiveWriter::new(Cursor::new(Vec::new()));
        if with_content {
            writer.write_book_info(&info).unwrap();
        }
        writer
            .write_toc(&[ChapterInfo::new(2, "第一章"), ChapterInfo::new(10, "第二章")])
            .unwrap();
        writer.write_chapter(&ChapterUid::Number(10), "<p>二</p>").unwrap();
        writer.write_chapter(&ChapterUid::Number(2), chapter).unwrap();
        writer.write_shared_stylesheet("p{margin:0}").unwrap();
        writer.write_image("coverpage", b"cover").unwrap();
        writer.write_image("pic", b"pic").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn package(bytes: Vec<u8>) -> Result<Vec<u8>, PackageError> {
        let mut archive = RawArchive::from_reader(Cursor::new(bytes), "mem").unwrap();
        let reporter = MemoryReporter::new();
        write_package(
            &mut archive,
            Cursor::new(Vec::new()),
            &PackageOptions::default(),
            &reporter,
        )
        .map(Cursor::into_inner)
    }

    fn read_entry(epub: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut out = String::new();
        epub.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    const CHAPTER: &str = r#"<div data-wr-bd="1"><h1><span>第</span><span>一章</span></h1><p><img data-src="https://res/x/pic"/></p></div>"#;

    #[test]
    fn mimetype_is_first_and_stored() {
        let epub = package(build_rdata(true, CHAPTER)).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(epub)).unwrap();
        let first = zip.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);
        assert_eq!(read_entry(&mut zip, "mimetype"), MIMETYPE);
        assert!(read_entry(&mut zip, "META-INF/container.xml").contains("OEBPS/content.opf"));
        assert!(
            read_entry(&mut zip, IBOOKS_OPTIONS_ENTRY)
                .contains(r#"<option name="specified-fonts">true</option>"#)
        );
    }

    #[test]
    fn package_contains_every_manifest_entry() {
        let epub = package(build_rdata(true, CHAPTER)).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(epub)).unwrap();
        for name in [
            "OEBPS/content.opf",
            "OEBPS/toc.ncx",
            "OEBPS/Text/chapter-2.xhtml",
            "OEBPS/Text/chapter-10.xhtml",
            "OEBPS/Text/coverpage.xhtml",
            "OEBPS/Styles/stylesheet.css",
            "OEBPS/Images/coverpage.jpg",
            "OEBPS/Images/pic.jpg",
        ] {
            assert!(zip.by_name(name).is_ok(), "missing {name}");
        }
        assert!(zip.by_name("OEBPS/content.json").is_err());
    }

    #[test]
    fn chapters_are_normalized_and_titled() {
        let epub = package(build_rdata(true, CHAPTER)).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(epub)).unwrap();
        let xhtml = read_entry(&mut zip, "OEBPS/Text/chapter-2.xhtml");
        assert!(xhtml.contains("<title>第一章</title>"));
        assert!(xhtml.contains(r#"href="../Styles/stylesheet.css""#));
        assert!(xhtml.contains("<h1><span>第一章</span></h1>"));
        assert!(xhtml.contains(r#"src="../Images/pic.jpg""#));
        assert!(!xhtml.contains("data-wr-bd"));
    }

    /// 输出必须能被严格的 XML 解析器完整读完。
    fn assert_well_formed(xhtml: &str) {
        let mut reader = quick_xml::Reader::from_str(xhtml);
        loop {
            match reader.read_event() {
                Ok(quick_xml::events::Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!(
                    "malformed xhtml at {}: {e}\n{xhtml}",
                    reader.buffer_position()
                ),
            }
        }
    }

    #[test]
    fn loose_html_text_packages_as_well_formed_xhtml() {
        let chapter = r#"<div><p>Tom & Jerry</p><p>1 < 2</p><p><img data-src="https://res/x/pic"/></p></div>"#;
        let epub = package(build_rdata(true, chapter)).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(epub)).unwrap();
        let xhtml = read_entry(&mut zip, "OEBPS/Text/chapter-2.xhtml");
        assert!(xhtml.contains("<p>Tom &amp; Jerry</p>"));
        assert!(xhtml.contains("<p>1 &lt; 2</p>"));
        assert!(xhtml.contains(r#"src="../Images/pic.jpg""#));
        assert_well_formed(&xhtml);
    }

    #[test]
    fn missing_content_json_is_fatal() {
        let err = package(build_rdata(false, CHAPTER)).unwrap_err();
        assert!(matches!(
            err,
            PackageError::Archive(ArchiveError::MissingEntry { .. })
        ));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn unparsable_chapter_is_fatal() {
        let err = package(build_rdata(true, r#"<p><span class="x"#)).unwrap_err();
        assert!(matches!(err, PackageError::Chapter { ref entry, .. } if entry == "Text/chapter-2.html"));
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn per_chapter_stylesheet_wins() {
        let info: BookInfo = serde_json::from_value(book_info_json()).unwrap();
        let mut writer = RawArchiveWriter::new(Cursor::new(Vec::new()));
        writer.write_book_info(&info).unwrap();
        writer.write_toc(&[ChapterInfo::new(1, "一")]).unwrap();
        writer.write_chapter(&ChapterUid::Number(1), "<p>a</p>").unwrap();
        writer.write_entry("Styles/chapter-1.css", b"p{}").unwrap();
        writer.write_shared_stylesheet("h1{}").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let epub = package(bytes).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(epub)).unwrap();
        let xhtml = read_entry(&mut zip, "OEBPS/Text/chapter-1.xhtml");
        assert!(xhtml.contains(r#"href="../Styles/chapter-1.css""#));
        assert!(!xhtml.contains("stylesheet.css"));
    }

    #[test]
    fn default_output_replaces_rdata_suffix() {
        assert_eq!(
            default_output_path(Path::new("/books/怦然心动.rdata.zip")),
            PathBuf::from("/books/怦然心动.epub")
        );
        assert_eq!(
            default_output_path(Path::new("book.zip")),
            PathBuf::from("book.epub")
        );
    }

    #[test]
    fn generate_writes_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.rdata.zip");
        fs::write(&input, build_rdata(true, CHAPTER)).unwrap();

        let reporter = MemoryReporter::new();
        let out = generate(&input, None, &PackageOptions::default(), &reporter).unwrap();
        assert_eq!(out, dir.path().join("book.epub"));
        assert!(ZipArchive::new(fs::File::open(&out).unwrap()).is_ok());
    }

    #[test]
    fn existing_output_is_kept_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.rdata.zip");
        fs::write(&input, build_rdata(true, CHAPTER)).unwrap();
        let target = dir.path().join("book.epub");
        fs::write(&target, b"old").unwrap();

        let options = PackageOptions {
            allow_overwrite: false,
            ..PackageOptions::default()
        };
        let err = generate(&input, None, &options, &MemoryReporter::new()).unwrap_err();
        assert!(matches!(err, PackageError::OutputExists { .. }));
        assert_eq!(fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn failed_package_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.rdata.zip");
        fs::write(&input, build_rdata(false, CHAPTER)).unwrap();

        let err = generate(&input, None, &PackageOptions::default(), &MemoryReporter::new());
        assert!(err.is_err());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
