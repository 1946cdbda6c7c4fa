use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::sources::crossref::CrossrefAuthor;

/// Separator between authors in the joined author cell.
pub const AUTHOR_DELIMITER: char = '|';

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Display name for one author, most specific form first:
/// `given family`, `name family`, `family`, `name`, `given`, then the raw record as JSON.
pub fn author_name(author: &CrossrefAuthor) -> String {
    let given = non_blank(author.given.as_deref());
    let family = non_blank(author.family.as_deref());
    let name = non_blank(author.name.as_deref());

    match (given, family, name) {
        (Some(given), Some(family), _) => format!("{given} {family}"),
        (None, Some(family), Some(name)) => format!("{name} {family}"),
        (None, Some(family), None) => family.to_string(),
        (_, None, Some(name)) => name.to_string(),
        (Some(given), None, None) => given.to_string(),
        (None, None, None) => {
            let raw = raw_author(author);
            warn!(author = %raw, "Author record has no usable name fields");
            raw
        }
    }
}

fn raw_author(author: &CrossrefAuthor) -> String {
    let mut fields = author.extra.clone();
    for (key, value) in [
        ("given", &author.given),
        ("family", &author.family),
        ("name", &author.name),
    ] {
        if let Some(value) = value {
            fields.insert(key.to_string(), serde_json::Value::String(value.clone()));
        }
    }
    serde_json::Value::Object(fields).to_string()
}

/// Joins author names with [`AUTHOR_DELIMITER`] in input order.
///
/// The delimiter is not escaped; a name containing it is logged because the joined cell can
/// no longer be split back unambiguously.
pub fn join_authors(authors: &[CrossrefAuthor]) -> String {
    let names: Vec<String> = authors.iter().map(author_name).collect();
    for name in names.iter().filter(|n| n.contains(AUTHOR_DELIMITER)) {
        warn!(author = %name, "Author name contains the '{AUTHOR_DELIMITER}' delimiter");
    }
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push(AUTHOR_DELIMITER);
        }
        out.push_str(name);
    }
    out
}

fn decode_html_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn strip_markup(value: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    static SPACE_RE: OnceLock<Regex> = OnceLock::new();
    let tags = TAG_RE.get_or_init(|| Regex::new(r"(?is)<[^>]+>").expect("valid regex"));
    let spaces = SPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    let without_tags = tags.replace_all(value, " ");
    spaces.replace_all(without_tags.trim(), " ").to_string()
}

/// Plain-text form of a Crossref abstract: JATS/HTML tags removed, entities decoded,
/// whitespace collapsed. Tags are stripped before decoding so escaped `<` stays text.
pub fn clean_abstract(value: &str) -> String {
    decode_html_entities(&strip_markup(value)).trim().to_string()
}
