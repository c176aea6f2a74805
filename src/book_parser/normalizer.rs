//! 章节片段归一化：移除阅读器埋点属性、合并冗余 `<span>`、改写图片地址。
//!
//! 输入为 `Text/chapter-{uid}.html` 的原文，输出可直接嵌入 EPUB 的 XHTML 片段。
//! 同一输入总是得到同一输出。

use std::collections::HashSet;

use super::markup::{self, Element, MarkupError, Node};
use crate::rdata::model::{IMAGES_DIR, asset_name};

/// 阅读器编辑/批注用的埋点属性。
pub const INSTRUMENTATION_ATTRS: [&str; 3] = ["data-wr-bd", "data-wr-co", "data-wr-id"];

const MERGE_CONTAINERS: [&str; 7] = ["h1", "h2", "h3", "h4", "h5", "h6", "p"];

pub fn normalize_chapter(fragment: &str) -> Result<Vec<Node>, MarkupError> {
    let mut nodes = markup::parse_fragment(fragment)?;
    markup::walk_nodes_mut(&mut nodes, &mut |el: &mut Element| {
        strip_instrumentation(el);
    });
    markup::walk_nodes_mut(&mut nodes, &mut |el: &mut Element| {
        if MERGE_CONTAINERS.contains(&el.name.as_str()) {
            merge_plain_spans(el);
        }
    });
    markup::walk_nodes_mut(&mut nodes, &mut |el: &mut Element| {
        if el.name == "img" {
            rewrite_image(el);
        }
    });
    Ok(nodes)
}

pub fn normalize_to_xhtml(fragment: &str) -> Result<String, MarkupError> {
    normalize_chapter(fragment).map(|nodes| markup::to_xhtml(&nodes))
}

/// 图片元素携带原始地址的属性：优先 `data-src`（懒加载），其次绝对地址的 `src`。
pub fn image_source(el: &Element) -> Option<&str> {
    if let Some(url) = el.attr("data-src").filter(|u| !u.trim().is_empty()) {
        return Some(url);
    }
    el.attr("src").filter(|u| is_remote_url(u))
}

/// 片段中全部图片地址，按出现顺序去重。
pub fn image_urls(fragment: &str) -> Result<Vec<String>, MarkupError> {
    let nodes = markup::parse_fragment(fragment)?;
    Ok(image_urls_in(&nodes))
}

pub fn image_urls_in(nodes: &[Node]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    markup::walk_nodes(nodes, &mut |el: &Element| {
        if el.name != "img" {
            return;
        }
        if let Some(url) = image_source(el) {
            if seen.insert(url.to_string()) {
                urls.push(url.to_string());
            }
        }
    });
    urls
}

fn is_remote_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//")
}

fn strip_instrumentation(el: &mut Element) {
    el.attrs
        .retain(|(key, _)| !INSTRUMENTATION_ATTRS.contains(&key.as_str()));
}

/// 从左到右扫描标题/段落的直接子节点，把无属性、纯文本的 `<span>` 并入当前合并目标。
///
/// 重置点：带属性的 `<span>`、其它元素、非空白文本。重置后遇到的第一个
/// 可合并 `<span>` 成为新的目标。没有文本的 `<span>` 原样保留，既不合并也不重置。
fn merge_plain_spans(el: &mut Element) {
    let children = std::mem::take(&mut el.children);
    let mut out: Vec<Node> = Vec::with_capacity(children.len());
    let mut target: Option<usize> = None;

    for child in children {
        match child {
            Node::Text(text) if text.trim().is_empty() => out.push(Node::Text(text)),
            Node::Element(span) if span.name == "span" && span.attrs.is_empty() => {
                match span.text_only() {
                    Some(text) if text.is_empty() => out.push(Node::Element(span)),
                    Some(text) => {
                        if let Some(idx) = target
                            && let Some(Node::Element(merge_into)) = out.get_mut(idx)
                        {
                            merge_into.append_text(&text);
                        } else {
                            target = Some(out.len());
                            out.push(Node::Element(span));
                        }
                    }
                    None => {
                        target = None;
                        out.push(Node::Element(span));
                    }
                }
            }
            other => {
                target = None;
                out.push(other);
            }
        }
    }

    el.children = out;
}

fn rewrite_image(el: &mut Element) {
    let Some(name) = image_source(el).and_then(asset_name) else {
        return;
    };
    el.remove_attr("data-src");
    el.set_attr("src", &format!("../{IMAGES_DIR}{name}.jpg"));
    if el.attr("alt").is_none() {
        el.set_attr("alt", "");
    }
}
