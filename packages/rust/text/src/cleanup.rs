//! Cleanup passes that turn converted Markdown or raw extracted text into
//! plain prose.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full Markdown → plain-text pipeline.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = strip_code_fences(&result);
    result = strip_headings(&result);
    result = flatten_links(&result);
    result = strip_emphasis(&result);
    result = unescape_markdown(&result);
    result = join_paragraphs(&result);

    result
}

/// Rewrite JATS-namespaced tags (`<jats:p>`, `<jats:italic>`) as plain HTML.
pub(crate) fn rewrite_jats(input: &str) -> String {
    static JATS_TITLE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<(/?)jats:title\b").expect("valid regex"));
    static JATS_ITALIC_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<(/?)jats:italic\b").expect("valid regex"));
    static JATS_BOLD_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<(/?)jats:bold\b").expect("valid regex"));
    static JATS_ANY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<(/?)jats:([a-zA-Z][\w-]*)").expect("valid regex"));

    let result = JATS_TITLE_RE.replace_all(input, "<${1}h4");
    let result = JATS_ITALIC_RE.replace_all(&result, "<${1}em");
    let result = JATS_BOLD_RE.replace_all(&result, "<${1}strong");
    JATS_ANY_RE.replace_all(&result, "<${1}${2}").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 1: Code fences
// ---------------------------------------------------------------------------

/// Drop fence lines, keeping the fenced content.
fn strip_code_fences(md: &str) -> String {
    md.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Headings
// ---------------------------------------------------------------------------

fn strip_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s+").expect("valid regex"));

    H_RE.replace_all(md, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 3: Links and images
// ---------------------------------------------------------------------------

/// `[text](url)` → `text`; images are removed entirely.
fn flatten_links(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    let without_images = IMAGE_RE.replace_all(md, "");
    LINK_RE.replace_all(&without_images, "$1").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 4: Emphasis markers
// ---------------------------------------------------------------------------

fn strip_emphasis(md: &str) -> String {
    static STRONG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\*\*|__)(\S(?:.*?\S)?)(\*\*|__)").expect("valid regex"));
    static EM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(^|[^\w\\])[*_](\S(?:[^*_]*?\S)?)[*_]").expect("valid regex"));

    let result = STRONG_RE.replace_all(md, "$2");
    EM_RE.replace_all(&result, "$1$2").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 5: Backslash escapes
// ---------------------------------------------------------------------------

fn unescape_markdown(md: &str) -> String {
    static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\\([\\`*_{}\[\]()#+\-.!<>|~])").expect("valid regex")
    });

    ESCAPE_RE.replace_all(md, "$1").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 6: Paragraphs
// ---------------------------------------------------------------------------

/// Join the lines of each paragraph and separate paragraphs with one blank line.
fn join_paragraphs(text: &str) -> String {
    static BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

    BLANK_RE
        .split(text)
        .map(collapse_inline_whitespace)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Collapse every run of whitespace (including newlines) to a single space.
pub(crate) fn collapse_inline_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the handful of entities that show up in otherwise plain abstracts.
pub(crate) fn decode_basic_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// PDF text
// ---------------------------------------------------------------------------

pub(crate) fn normalize_pdf_text(text: &str) -> String {
    static HYPHEN_BREAK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\p{L})-[ \t]*\n[ \t]*(\p{Ll})").expect("valid regex"));

    let unified = text.replace("\r\n", "\n").replace('\u{000C}', "\n\n");
    let dehyphenated = HYPHEN_BREAK_RE.replace_all(&unified, "$1$2");
    join_paragraphs(&dehyphenated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
