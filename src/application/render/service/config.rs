use std::collections::{HashMap, HashSet};

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::Options;

/// Keeps generated anchors out of the page's own id namespace.
pub(crate) const HEADING_ID_PREFIX: &str = "heading-";

pub(crate) fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tagfilter = false;
    ext.header_ids = Some(HEADING_ID_PREFIX.to_string());

    let render = &mut options.render;
    render.hardbreaks = true;
    render.github_pre_lang = true;
    // Raw author HTML is emitted and then stripped by the sanitizer.
    render.r#unsafe = true;

    options
}

const ALLOWED_TAGS: &[&str] = &[
    "a",
    "abbr",
    "acronym",
    "b",
    "blockquote",
    "br",
    "code",
    "del",
    "div",
    "em",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "hr",
    "i",
    "img",
    "ins",
    "li",
    "ol",
    "p",
    "pre",
    "span",
    "strong",
    "sub",
    "sup",
    "table",
    "tbody",
    "td",
    "th",
    "thead",
    "tr",
    "ul",
];

const TAG_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href", "title", "rel", "id"]),
    ("abbr", &["title"]),
    ("acronym", &["title"]),
    ("img", &["src", "alt", "title", "width", "height", "class"]),
    ("div", &["class"]),
    ("span", &["class", "data-language"]),
    ("code", &["class"]),
    ("pre", &["class", "data-language"]),
    ("td", &["align"]),
    ("th", &["align"]),
];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// The one allow-list every stored fragment passes through.
pub(crate) fn build_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    builder.tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>());
    builder.generic_attributes(HashSet::new());
    builder.tag_attributes(
        TAG_ATTRIBUTES
            .iter()
            .map(|(tag, attrs)| (*tag, attrs.iter().copied().collect::<HashSet<_>>()))
            .collect::<HashMap<_, _>>(),
    );
    builder.url_schemes(URL_SCHEMES.iter().copied().collect::<HashSet<_>>());
    // `rel` is author-controlled here, so ammonia must not also inject one.
    builder.link_rel(None);

    builder
}
