//! Payload parsing shared by provider adapters: inverted-index abstracts
//! and the arXiv Atom feed.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use paperscout_shared::{PaperScoutError, Result};

/// Positions beyond this are treated as corrupt and ignored.
const MAX_ABSTRACT_POSITIONS: usize = 20_000;

// ---------------------------------------------------------------------------
// Inverted-index abstracts
// ---------------------------------------------------------------------------

/// Rebuild linear text from a `{token: [positions]}` index.
///
/// Each token is placed at every position it records; positions nobody
/// claims stay empty and are dropped when joining with single spaces.
pub fn reconstruct_abstract(index: &HashMap<String, Vec<usize>>) -> Option<String> {
    let len = index
        .values()
        .flatten()
        .copied()
        .filter(|&p| p < MAX_ABSTRACT_POSITIONS)
        .max()?
        + 1;

    let mut slots: Vec<&str> = vec![""; len];
    for (token, positions) in index {
        for &pos in positions {
            if pos < len {
                slots[pos] = token.as_str();
            }
        }
    }

    let text = slots
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() { None } else { Some(text) }
}

// ---------------------------------------------------------------------------
// Atom feed
// ---------------------------------------------------------------------------

/// One `<entry>` of an arXiv Atom feed, with text fields as they appear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published: String,
    pub authors: Vec<String>,
    pub doi: Option<String>,
    pub abs_url: Option<String>,
    pub pdf_url: Option<String>,
}

impl AtomEntry {
    /// Year from the `published` timestamp.
    pub fn year(&self) -> Option<i32> {
        self.published.get(..4)?.parse().ok()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
    Doi,
}

/// Parse an arXiv Atom feed into entries.
///
/// arXiv reports query errors as a single entry whose id points at
/// `/api/errors`; that is surfaced as a parse error.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<AtomEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut field = Field::None;
    let mut author = String::new();
    let mut saw_feed = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"feed" => saw_feed = true,
                    b"entry" => current = Some(AtomEntry::default()),
                    b"link" => {
                        if let Some(entry) = current.as_mut() {
                            apply_link(entry, &e);
                        }
                    }
                    b"author" => author.clear(),
                    other if current.is_some() => {
                        field = match other {
                            b"id" => Field::Id,
                            b"title" => Field::Title,
                            b"summary" => Field::Summary,
                            b"published" => Field::Published,
                            b"name" => Field::AuthorName,
                            b"doi" => Field::Doi,
                            _ => Field::None,
                        };
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    if let Some(entry) = current.as_mut() {
                        apply_link(entry, &e);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| PaperScoutError::parse(format!("arXiv feed text: {e}")))?;
                let target = match field {
                    Field::Id => &mut entry.id,
                    Field::Title => &mut entry.title,
                    Field::Summary => &mut entry.summary,
                    Field::Published => &mut entry.published,
                    Field::AuthorName => &mut author,
                    Field::Doi => entry.doi.get_or_insert_with(String::new),
                    Field::None => continue,
                };
                if !target.is_empty() {
                    target.push(' ');
                }
                target.push_str(&text);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            if entry.id.contains("/api/errors") {
                                return Err(PaperScoutError::parse(format!(
                                    "arXiv rejected the query: {}",
                                    entry.summary.trim()
                                )));
                            }
                            entries.push(entry);
                        }
                    }
                    b"author" => {
                        if let Some(entry) = current.as_mut() {
                            let name = author.trim();
                            if !name.is_empty() {
                                entry.authors.push(name.to_string());
                            }
                        }
                        author.clear();
                    }
                    _ => {}
                }
                field = Field::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PaperScoutError::parse(format!(
                    "arXiv feed is not valid XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_feed {
        return Err(PaperScoutError::parse("arXiv response has no <feed> root"));
    }
    Ok(entries)
}

/// Record the abstract-page or PDF link carried by a `<link>` element.
fn apply_link(entry: &mut AtomEntry, e: &BytesStart<'_>) {
    let mut href = None;
    let mut rel = None;
    let mut title = None;
    let mut mime = None;

    for attr in e.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        match attr.key.as_ref() {
            b"href" => href = Some(value.into_owned()),
            b"rel" => rel = Some(value.into_owned()),
            b"title" => title = Some(value.into_owned()),
            b"type" => mime = Some(value.into_owned()),
            _ => {}
        }
    }

    let Some(href) = href else {
        return;
    };
    if title.as_deref() == Some("pdf") || mime.as_deref() == Some("application/pdf") {
        entry.pdf_url = Some(href);
    } else if rel.as_deref() == Some("alternate") {
        entry.abs_url = Some(href);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/providers")
            .join(name);
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
    }

    #[test]
    fn inverted_index_is_linearized() {
        let index: HashMap<String, Vec<usize>> = [
            ("world".to_string(), vec![1]),
            ("hello".to_string(), vec![0, 2]),
        ]
        .into_iter()
        .collect();
        assert_eq!(reconstruct_abstract(&index).as_deref(), Some("hello world hello"));
    }

    #[test]
    fn gaps_in_the_index_are_dropped() {
        let index: HashMap<String, Vec<usize>> =
            [("a".to_string(), vec![0]), ("b".to_string(), vec![4])]
                .into_iter()
                .collect();
        assert_eq!(reconstruct_abstract(&index).as_deref(), Some("a b"));
    }

    #[test]
    fn empty_index_has_no_abstract() {
        assert_eq!(reconstruct_abstract(&HashMap::new()), None);
    }

    #[test]
    fn atom_fixture_parses() {
        let entries = parse_atom_feed(&fixture("arxiv.xml")).expect("parse");
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.id, "http://arxiv.org/abs/2301.00001v2");
        assert!(first.title.starts_with("Formal Models of"));
        assert!(first.summary.contains("processes & analyse"));
        assert_eq!(first.authors, vec!["Barbara Liskov", "Leslie Lamport"]);
        assert_eq!(first.doi.as_deref(), Some("10.1234/Chain.2022.001"));
        assert_eq!(first.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2301.00001v2"));
        assert_eq!(first.abs_url.as_deref(), Some("http://arxiv.org/abs/2301.00001v2"));
        assert_eq!(first.year(), Some(2023));

        assert_eq!(entries[1].doi, None);
    }

    #[test]
    fn atom_error_entry_is_reported() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
            <entry><id>http://arxiv.org/api/errors#incorrect_id_format</id>
            <title>Error</title><summary>incorrect id format</summary></entry></feed>"#;
        let err = parse_atom_feed(xml).unwrap_err();
        assert!(err.to_string().contains("incorrect id format"));
    }

    #[test]
    fn non_feed_payload_is_rejected() {
        assert!(parse_atom_feed("<html><body>maintenance</body></html>").is_err());
        assert!(parse_atom_feed("<feed><entry><title>x</entry></feed>").is_err());
    }
}
