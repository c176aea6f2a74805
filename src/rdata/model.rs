//! 原始数据文件（rdata）的数据模型。
//!
//! 固定布局：
//! - `content.json`：书籍元信息（[`BookInfo`]）
//! - `toc.json`：章节描述列表（[`ChapterInfo`]）
//! - `Styles/`：样式表（共享 `stylesheet.css`，旧布局为每章 `chapter-{uid}.css`）
//! - `Text/chapter-{uid}.html`：每章原始片段
//! - `Images/{name}.jpg`：全部图片，封面固定为 `coverpage.jpg`

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const CONTENT_JSON: &str = "content.json";
pub const TOC_JSON: &str = "toc.json";
pub const IMAGES_DIR: &str = "Images/";
pub const STYLES_DIR: &str = "Styles/";
pub const TEXT_DIR: &str = "Text/";
pub const SHARED_STYLESHEET: &str = "Styles/stylesheet.css";
pub const COVER_NAME: &str = "coverpage";

/// 章节 uid：阅读器数据里既可能是整数也可能是字符串，不保证连续。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterUid {
    Number(u64),
    Text(String),
}

impl fmt::Display for ChapterUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterUid::Number(n) => write!(f, "{n}"),
            ChapterUid::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ChapterUid {
    fn from(value: u64) -> Self {
        ChapterUid::Number(value)
    }
}

/// 书籍元信息，对应 `content.json`。
///
/// 除 `translator` 外均为必填；未建模的字段原样保留在 `extra` 中，
/// 写回时不丢失。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub book_id: String,
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translator: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS`
    pub publish_time: String,
    pub isbn: String,
    pub publisher: String,
    pub intro: String,
    pub cover: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BookInfo {
    /// 译者（空字符串视为缺失）。
    pub fn translator(&self) -> Option<&str> {
        self.translator
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// 章节描述，对应 `toc.json` 的一项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterInfo {
    pub chapter_uid: ChapterUid,
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChapterInfo {
    #[cfg(test)]
    pub fn new(uid: impl Into<ChapterUid>, title: &str) -> Self {
        Self {
            chapter_uid: uid.into(),
            title: title.to_string(),
            extra: Map::new(),
        }
    }

    pub fn entry_name(&self) -> String {
        chapter_entry(&self.chapter_uid)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentChapter {
    pub chapter_uid: ChapterUid,
}

/// 阅读器在切换到某一章后给出的状态快照。
///
/// 在内容源边界处一次性校验（serde 反序列化），下游不再重复检查。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterPayload {
    pub current_chapter: CurrentChapter,
    pub chapter_content_html: Vec<String>,
    #[serde(default)]
    pub chapter_content_styles: Option<String>,
    pub book_info: BookInfo,
    pub chapter_infos: Vec<ChapterInfo>,
}

impl ChapterPayload {
    #[cfg(test)]
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn uid(&self) -> &ChapterUid {
        &self.current_chapter.chapter_uid
    }

    /// 按原顺序拼接的正文片段。
    pub fn fragment(&self) -> String {
        self.chapter_content_html.concat()
    }

    pub fn styles(&self) -> &str {
        self.chapter_content_styles.as_deref().unwrap_or_default()
    }
}

/// rdata 内条目所属目录。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Image,
    Style,
    Text,
    Metadata,
    Other,
}

impl EntryKind {
    pub fn of(name: &str) -> Self {
        if name.starts_with(IMAGES_DIR) {
            EntryKind::Image
        } else if name.starts_with(STYLES_DIR) {
            EntryKind::Style
        } else if name.starts_with(TEXT_DIR) {
            EntryKind::Text
        } else if name == CONTENT_JSON || name == TOC_JSON {
            EntryKind::Metadata
        } else {
            EntryKind::Other
        }
    }
}

pub fn chapter_entry(uid: &ChapterUid) -> String {
    format!("{TEXT_DIR}chapter-{uid}.html")
}

pub fn image_entry(name: &str) -> String {
    format!("{IMAGES_DIR}{name}.jpg")
}

/// 图片文件名：URL 路径的最后一段（去掉查询串和锚点）。
///
/// 同一张图片被多章引用时得到同一个名字，只存一份。
pub fn asset_name(url: &str) -> Option<String> {
    let url = url.trim();
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = url[..end].trim_end_matches('/');
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.is_empty() || name.contains(':') {
        return None;
    }
    Some(name.to_string())
}

/// 封面缩略图地址 → 原图地址。
///
/// 只替换最后一段路径开头的 `s_` 为 `o_`；其余部分不做子串替换。
pub fn full_resolution_cover(url: &str) -> String {
    let url = url.trim();
    let seg_start = url.rfind('/').map(|i| i + 1).unwrap_or(0);
    if url[seg_start..].starts_with("s_") {
        format!("{}o_{}", &url[..seg_start], &url[seg_start + 2..])
    } else {
        url.to_string()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uid_accepts_number_and_string() {
        let toc: Vec<ChapterInfo> = serde_json::from_value(json!([
            {"chapterUid": 10, "title": "一"},
            {"chapterUid": "abc", "title": "二"}
        ]))
        .unwrap();
        assert_eq!(toc[0].chapter_uid, ChapterUid::Number(10));
        assert_eq!(toc[1].entry_name(), "Text/chapter-abc.html");
    }

    #[test]
    fn book_info_keeps_unknown_fields() {
        let info: BookInfo = serde_json::from_value(fixtures::book_info_json()).unwrap();
        assert_eq!(info.extra.get("format"), Some(&json!("epub")));
        let back = serde_json::to_value(&info).unwrap();
        assert_eq!(back["format"], "epub");
        assert_eq!(back["bookId"], "812443");
    }

    #[test]
    fn numeric_book_id_becomes_string() {
        let mut raw = fixtures::book_info_json();
        raw["bookId"] = json!(812443);
        let info: BookInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.book_id, "812443");
    }

    #[test]
    fn missing_mandatory_key_is_rejected() {
        let mut raw = fixtures::book_info_json();
        raw.as_object_mut().unwrap().remove("isbn");
        assert!(serde_json::from_value::<BookInfo>(raw).is_err());
    }

    #[test]
    fn translator_is_optional() {
        let mut raw = fixtures::book_info_json();
        raw.as_object_mut().unwrap().remove("translator");
        let info: BookInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.translator(), None);
        let back = serde_json::to_value(&info).unwrap();
        assert!(back.get("translator").is_none());
    }

    #[test]
    fn asset_name_is_last_path_segment() {
        assert_eq!(
            asset_name("https://res.weread.qq.com/wrepub/epub_25_12").as_deref(),
            Some("epub_25_12")
        );
        assert_eq!(
            asset_name("https://host/a/b/pic?x=1#frag").as_deref(),
            Some("pic")
        );
        assert_eq!(asset_name("https://host/"), Some("host".to_string()));
        assert_eq!(asset_name(""), None);
    }

    #[test]
    fn cover_prefix_swapped_only_in_final_segment() {
        assert_eq!(
            full_resolution_cover("https://cdn/weread/cover/s_dir/s_book.jpg"),
            "https://cdn/weread/cover/s_dir/o_book.jpg"
        );
        assert_eq!(
            full_resolution_cover("https://cdn/cover/t6_book.jpg"),
            "https://cdn/cover/t6_book.jpg"
        );
    }

    #[test]
    fn entry_kind_by_directory() {
        assert_eq!(EntryKind::of("Images/coverpage.jpg"), EntryKind::Image);
        assert_eq!(EntryKind::of("Styles/stylesheet.css"), EntryKind::Style);
        assert_eq!(EntryKind::of("Text/chapter-1.html"), EntryKind::Text);
        assert_eq!(EntryKind::of("toc.json"), EntryKind::Metadata);
        assert_eq!(EntryKind::of("README"), EntryKind::Other);
    }

    #[test]
    fn payload_concatenates_segments_in_order() {
        let mut state = json!({
            "currentChapter": {"chapterUid": 3},
            "chapterContentHtml": ["<p>a</p>", "<p>b</p>"],
            "chapterContentStyles": null,
            "chapterInfos": [{"chapterUid": 3, "title": "三"}]
        });
        state["bookInfo"] = fixtures::book_info_json();
        let payload = ChapterPayload::from_value(state).unwrap();
        assert_eq!(payload.fragment(), "<p>a</p><p>b</p>");
        assert_eq!(payload.styles(), "");
        assert_eq!(payload.uid(), &ChapterUid::Number(3));
    }
}
