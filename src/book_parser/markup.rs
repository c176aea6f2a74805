//! 章节片段的最小文档树：元素、属性、子节点、文本。
//!
//! 解析基于 quick-xml 的事件流，按 HTML 习惯放宽：
//! - `img`/`br` 等空元素不要求闭合；
//! - 结束标签不匹配时向上找到最近的同名元素一并闭合，找不到则忽略；
//! - 末尾未闭合的元素自动闭合；
//! - 不成对的 `&` 与不开启标签的 `<` 按普通字符处理；
//! - 属性值可以不加引号，也可以省略（布尔属性）。
//!
//! 语法层面无法恢复的错误（标签未闭合、元素名非法等）返回 [`MarkupError`]。

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::escape::{escape, resolve_predefined_entity, unescape_with};
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

const VOID_ELEMENTS: [&str; 12] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("语法错误（偏移 {position}）: {source}")]
    Syntax {
        position: u64,
        source: quick_xml::Error,
    },
    #[error("属性非法（偏移 {position}）: {source}")]
    Attribute { position: u64, source: AttrError },
    #[error("编码错误（偏移 {position}）: {message}")]
    Encoding { position: u64, message: String },
    #[error("元素名非法（偏移 {position}）: {name:?}")]
    InvalidName { position: u64, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(k, _)| k == key)?;
        Some(self.attrs.remove(pos).1)
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }

    /// 子节点全部是文本时返回拼接后的文本。
    pub fn text_only(&self) -> Option<String> {
        let mut out = String::new();
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(_) => return None,
            }
        }
        Some(out)
    }

    /// 全部后代文本。
    #[cfg(test)]
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn append_text(&mut self, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    /// 先序遍历自身及全部后代元素。
    pub fn walk<F: FnMut(&Element)>(&self, f: &mut F) {
        f(self);
        for child in &self.children {
            if let Node::Element(el) = child {
                el.walk(f);
            }
        }
    }

    pub fn walk_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        f(self);
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.walk_mut(f);
            }
        }
    }
}

pub fn walk_nodes<F: FnMut(&Element)>(nodes: &[Node], f: &mut F) {
    for node in nodes {
        if let Node::Element(el) = node {
            el.walk(f);
        }
    }
}

pub fn walk_nodes_mut<F: FnMut(&mut Element)>(nodes: &mut [Node], f: &mut F) {
    for node in nodes {
        if let Node::Element(el) = node {
            el.walk_mut(f);
        }
    }
}

#[cfg(test)]
fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => collect_text(&el.children, out),
        }
    }
}

// ── 解析 ────────────────────────────────────────────────────────

#[derive(Default)]
struct TreeBuilder {
    roots: Vec<Node>,
    stack: Vec<Element>,
}

impl TreeBuilder {
    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let siblings = match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        };
        if let Some(Node::Text(last)) = siblings.last_mut() {
            last.push_str(text);
        } else {
            siblings.push(Node::Text(text.to_string()));
        }
    }

    fn open(&mut self, el: Element) {
        if el.is_void() {
            self.push_node(Node::Element(el));
        } else {
            self.stack.push(el);
        }
    }

    fn close(&mut self, name: &str) {
        let Some(pos) = self.stack.iter().rposition(|el| el.name == name) else {
            return;
        };
        while self.stack.len() > pos {
            if let Some(el) = self.stack.pop() {
                self.push_node(Node::Element(el));
            }
        }
    }

    fn finish(mut self) -> Vec<Node> {
        while let Some(el) = self.stack.pop() {
            self.push_node(Node::Element(el));
        }
        self.roots
    }
}

pub fn parse_fragment(html: &str) -> Result<Vec<Node>, MarkupError> {
    let html = escape_stray_lt(html);
    let mut reader = Reader::from_str(&html);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
    }

    let mut builder = TreeBuilder::default();
    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|source| MarkupError::Syntax { position, source })?;
        match event {
            Event::Start(e) => {
                let el = element_from_start(&reader, &e, position)?;
                builder.open(el);
            }
            Event::Empty(e) => {
                let el = element_from_start(&reader, &e, position)?;
                builder.push_node(Node::Element(el));
            }
            Event::End(e) => {
                let name = decode_utf8(e.name().as_ref(), position)?.to_ascii_lowercase();
                builder.close(&name);
            }
            Event::Text(e) => {
                let text = e.decode().map_err(|err| MarkupError::Encoding {
                    position,
                    message: err.to_string(),
                })?;
                builder.push_text(&text);
            }
            Event::CData(e) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| MarkupError::Encoding {
                        position,
                        message: err.to_string(),
                    })?;
                builder.push_text(&text);
            }
            Event::GeneralRef(e) => {
                let name = e.decode().map_err(|err| MarkupError::Encoding {
                    position,
                    message: err.to_string(),
                })?;
                let raw = format!("&{name};");
                builder.push_text(&decode_entities(&raw));
            }
            Event::Eof => break,
            // 注释、声明、处理指令、DOCTYPE 不进入文档树。
            _ => {}
        }
    }

    Ok(builder.finish())
}

/// 按 HTML 分词规则，`<` 后面不是字母、`/`、`!`、`?` 时只是普通字符，
/// 这里改写为 `&lt;` 再交给 XML 解析器。注释和 CDATA 原样保留。
fn escape_stray_lt(html: &str) -> Cow<'_, str> {
    let mut out = String::new();
    let mut copied = 0;
    let mut pos = 0;
    while let Some(found) = html[pos..].find('<') {
        let lt = pos + found;
        let rest = &html[lt..];
        if let Some(len) = opaque_section_len(rest) {
            pos = lt + len;
            continue;
        }
        let opens_markup = rest[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !opens_markup {
            out.push_str(&html[copied..lt]);
            out.push_str("&lt;");
            copied = lt + 1;
        }
        pos = lt + 1;
    }
    if copied == 0 {
        return Cow::Borrowed(html);
    }
    out.push_str(&html[copied..]);
    Cow::Owned(out)
}

/// 完整的注释或 CDATA 区段长度；未闭合时返回 `None`，由解析器报错。
fn opaque_section_len(rest: &str) -> Option<usize> {
    [("<!--", "-->"), ("<![CDATA[", "]]>")]
        .into_iter()
        .find(|(open, _)| rest.starts_with(open))
        .and_then(|(open, close)| {
            rest[open.len()..]
                .find(close)
                .map(|end| open.len() + end + close.len())
        })
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn element_from_start(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    position: u64,
) -> Result<Element, MarkupError> {
    let name = decode_utf8(start.name().as_ref(), position)?;
    if !is_valid_name(&name) {
        return Err(MarkupError::InvalidName { position, name });
    }
    let mut el = Element::new(&name);
    for attr in start.html_attributes() {
        let attr = attr.map_err(|source| MarkupError::Attribute { position, source })?;
        let key = decode_utf8(attr.key.as_ref(), position)?.to_ascii_lowercase();
        if !is_valid_name(&key) {
            // 序列化时写不出合法属性，丢弃。
            continue;
        }
        let raw = reader
            .decoder()
            .decode(&attr.value)
            .map_err(|err| MarkupError::Encoding {
                position,
                message: err.to_string(),
            })?;
        let value = decode_entities(&raw);
        el.set_attr(&key, &value);
    }
    Ok(el)
}

fn decode_utf8(bytes: &[u8], position: u64) -> Result<String, MarkupError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| MarkupError::Encoding {
            position,
            message: err.to_string(),
        })
}

/// 解码 XML 预定义实体、数字字符引用以及常见 HTML 实体；无法识别时保留原文。
fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    match unescape_with(raw, |name| {
        resolve_predefined_entity(name).or_else(|| resolve_html_entity(name))
    }) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Borrowed(raw),
    }
}

fn resolve_html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "hellip" => "\u{2026}",
        "middot" => "\u{b7}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        _ => return None,
    })
}

// ── 序列化 ──────────────────────────────────────────────────────

/// 序列化为 XHTML 片段。空元素自闭合，其余元素总是显式闭合。
pub fn to_xhtml(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node);
    }
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Text(text) => out.push_str(&escape(text.as_str())),
        Node::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape(value.as_str()));
                out.push('"');
            }
            if el.children.is_empty() && el.is_void() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_node(out, child);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}
