//! Lightweight inspection of server-rendered login pages.
//!
//! Only what the direct-HTTP login needs: tag attributes, hidden form fields,
//! CSRF tokens, element ids and error text. Not a general HTML parser.

use std::sync::LazyLock;

use regex::Regex;

fn pattern(re: &str) -> Regex {
    #[expect(clippy::expect_used, reason = "literal patterns covered by unit tests")]
    Regex::new(re).expect("valid pattern")
}

static TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)<([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>"));

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
});

static CSRF_NAME: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)csrf|_token|authenticity_token"));

static CSRF_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"csrfToken["\s:=]+["']([\w-]+)["']"#));

static ERROR_CLASS: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)error|alert-danger"));

static LOGIN_ID: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)login"));

static LOGIN_ACTION: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)login|signin|auth"));

/// An opening tag with its attributes and byte span in the source.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Lowercased tag name.
    pub name: String,
    /// Attributes in source order, names lowercased.
    pub attrs: Vec<(String, String)>,
    /// Byte offset of `<`.
    pub start: usize,
    /// Byte offset just past `>`.
    pub end: usize,
}

impl Tag {
    /// Attribute value by (lowercase) name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Every opening tag named `name` (case-insensitive), in document order.
pub fn tags<'a>(html: &'a str, name: &'a str) -> impl Iterator<Item = Tag> + 'a {
    TAG.captures_iter(html).filter_map(move |caps| {
        let tag_name = caps.get(1)?.as_str();
        if !name.is_empty() && !tag_name.eq_ignore_ascii_case(name) {
            return None;
        }
        let whole = caps.get(0)?;
        let attrs = caps.get(2).map_or_else(Vec::new, |m| parse_attrs(m.as_str()));
        Some(Tag {
            name: tag_name.to_ascii_lowercase(),
            attrs,
            start: whole.start(),
            end: whole.end(),
        })
    })
}

fn parse_attrs(text: &str) -> Vec<(String, String)> {
    ATTR.captures_iter(text)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((key, decode_entities(value)))
        })
        .collect()
}

/// Find the anti-forgery token on a page.
///
/// Looks at input names, then a `csrf-token` meta tag, then a `csrfToken`
/// assignment in inline script.
#[must_use]
pub fn csrf_token(html: &str) -> Option<String> {
    let from_input = tags(html, "input").find_map(|tag| {
        let name = tag.attr("name")?;
        let value = tag.attr("value")?;
        (CSRF_NAME.is_match(name) && !value.is_empty()).then(|| value.to_string())
    });
    if from_input.is_some() {
        return from_input;
    }

    let from_meta = tags(html, "meta").find_map(|tag| {
        let name = tag.attr("name")?;
        let content = tag.attr("content")?;
        (name.eq_ignore_ascii_case("csrf-token") && !content.is_empty())
            .then(|| content.to_string())
    });
    if from_meta.is_some() {
        return from_meta;
    }

    CSRF_SCRIPT
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The login form's markup: a form with a login-ish id, else a login-ish
/// action, else the first form.
#[must_use]
pub fn login_form(html: &str) -> Option<&str> {
    let forms: Vec<Tag> = tags(html, "form").collect();
    let chosen = forms
        .iter()
        .find(|f| f.attr("id").is_some_and(|id| LOGIN_ID.is_match(id)))
        .or_else(|| {
            forms
                .iter()
                .find(|f| f.attr("action").is_some_and(|a| LOGIN_ACTION.is_match(a)))
        })
        .or_else(|| forms.first())?;

    let rest = &html[chosen.start..];
    let close = find_ignore_case(rest, "</form>").map_or(rest.len(), |i| i + "</form>".len());
    Some(&rest[..close])
}

/// Hidden inputs of the login form as `(name, value)` pairs.
#[must_use]
pub fn hidden_fields(html: &str) -> Vec<(String, String)> {
    let Some(form) = login_form(html) else {
        return Vec::new();
    };
    tags(form, "input")
        .filter(|t| t.attr("type").is_some_and(|ty| ty.eq_ignore_ascii_case("hidden")))
        .filter_map(|t| {
            let name = t.attr("name").filter(|n| !n.is_empty())?;
            Some((name.to_string(), t.attr("value").unwrap_or("").to_string()))
        })
        .collect()
}

/// Whether any element carries `id`.
#[must_use]
pub fn has_element_id(html: &str, id: &str) -> bool {
    tags(html, "").any(|t| t.attr("id") == Some(id))
}

/// Ids of the first `limit` `<div>` elements that have one.
#[must_use]
pub fn div_ids(html: &str, limit: usize) -> Vec<String> {
    tags(html, "div")
        .filter_map(|t| t.attr("id").map(str::to_string))
        .take(limit)
        .collect()
}

/// Text of the first error-styled `<div>`, if one is present.
///
/// The text may be empty when the element is.
#[must_use]
pub fn error_text(html: &str) -> Option<String> {
    let tag = tags(html, "div")
        .find(|t| t.attr("class").is_some_and(|c| ERROR_CLASS.is_match(c)))?;
    let rest = &html[tag.end..];
    let inner = find_ignore_case(rest, "</div>").map_or(rest, |i| &rest[..i]);
    Some(strip_tags(inner))
}

/// Reduce markup to its text with whitespace collapsed.
#[must_use]
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}
