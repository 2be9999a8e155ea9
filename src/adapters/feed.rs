//! Syndication feed adapter for RSS 2.0, RSS 1.0 (RDF) and Atom.
//!
//! Before deserializing, the body goes through two clean-up passes:
//!
//! - HTML named entities that XML does not define become numeric references
//! - Extension elements (`media:title`, `dc:creator`, `atom:link`, ...) are
//!   dropped, and Atom `type="xhtml"` text constructs are flattened to text
//!
//! The feed flavour is then decided by the root element and the document is
//! deserialized with `quick_xml::de`. Summaries are reduced to visible text
//! and cut to [`DESCRIPTION_LIMIT`] characters.

use std::borrow::Cow;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::SourceAdapter;
use crate::error::FetchError;
use crate::models::{NormalizedItem, SourceDefinition, SourceKind};
use crate::session::Session;
use crate::utils::{collapse_whitespace, strip_markup, truncate_chars};

pub const DESCRIPTION_LIMIT: usize = 100;

static NAMED_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]{1,31});").unwrap());

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RSS 1.0 keeps items as siblings of the channel.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

impl AtomEntry {
    fn alternate_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .map(|l| l.href.as_str())
    }
}

/// One entry before normalization, whatever the flavour.
struct Entry {
    title: String,
    link: String,
    summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavour {
    Rss,
    Rdf,
    Atom,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedAdapter;

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::FeedDocument
    }

    #[instrument(level = "debug", skip_all, fields(source = %source.name))]
    async fn fetch(&self, session: &Session, source: &SourceDefinition) -> Result<Vec<NormalizedItem>, FetchError> {
        let body = session.get_text(&source.url, source.effective_timeout()).await?;
        parse_feed(&body, &source.name)
    }
}

/// Parse a feed body, keeping at most the first 30 entries.
///
/// # Arguments
///
/// * `body` - The raw response body
/// * `source_name` - Stamped on every item as `source_name`
///
/// # Returns
///
/// Items ranked from 1 in document order, or [`FetchError::Payload`] when
/// the body is not a well-formed RSS, RDF or Atom document.
pub fn parse_feed(body: &str, source_name: &str) -> Result<Vec<NormalizedItem>, FetchError> {
    let xml = normalize_entities(body.trim_start_matches('\u{feff}'));
    let xml = strip_extensions(&xml)?;
    let entries = match detect_flavour(&xml)? {
        Flavour::Rss => {
            let rss: Rss = quick_xml::de::from_str(&xml).map_err(payload_error)?;
            rss.channel.items.into_iter().map(Entry::from).collect::<Vec<_>>()
        }
        Flavour::Rdf => {
            let rdf: Rdf = quick_xml::de::from_str(&xml).map_err(payload_error)?;
            rdf.items.into_iter().map(Entry::from).collect()
        }
        Flavour::Atom => {
            let feed: AtomFeed = quick_xml::de::from_str(&xml).map_err(payload_error)?;
            feed.entries.into_iter().map(Entry::from).collect()
        }
    };

    let items: Vec<NormalizedItem> = entries
        .into_iter()
        .take(SourceKind::FeedDocument.item_cap())
        .enumerate()
        .map(|(idx, entry)| {
            NormalizedItem::new(
                entry.title,
                source_name,
                idx as u32 + 1,
                entry.link,
                truncate_chars(&strip_markup(&entry.summary), DESCRIPTION_LIMIT),
            )
        })
        .collect();

    debug!(count = items.len(), "Parsed feed entries");
    Ok(items)
}

impl From<RssItem> for Entry {
    fn from(item: RssItem) -> Self {
        Entry {
            title: collapse_whitespace(&item.title.unwrap_or_default()),
            link: item.link.unwrap_or_default().trim().to_string(),
            summary: item.description.unwrap_or_default(),
        }
    }
}

impl From<AtomEntry> for Entry {
    fn from(entry: AtomEntry) -> Self {
        let link = entry.alternate_link().unwrap_or_default().trim().to_string();
        let summary = entry
            .summary
            .or(entry.content)
            .map(|t| t.value)
            .unwrap_or_default();
        Entry {
            title: collapse_whitespace(&entry.title.map(|t| t.value).unwrap_or_default()),
            link,
            summary,
        }
    }
}

fn detect_flavour(xml: &str) -> Result<Flavour, FetchError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return match e.local_name().as_ref() {
                    b"rss" => Ok(Flavour::Rss),
                    b"RDF" => Ok(Flavour::Rdf),
                    b"feed" => Ok(Flavour::Atom),
                    other => Err(FetchError::Payload(format!(
                        "unrecognised feed root <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => return Err(FetchError::Payload("empty feed document".to_string())),
            Ok(_) => {}
            Err(e) => return Err(payload_error(e)),
        }
    }
}

fn payload_error(e: impl std::fmt::Display) -> FetchError {
    FetchError::Payload(e.to_string())
}

/// Rewrite HTML named entities into numeric references XML understands.
///
/// The five XML entities are left alone. Names we do not know are escaped
/// so they survive as literal text instead of failing the whole document.
fn normalize_entities(s: &str) -> Cow<'_, str> {
    NAMED_ENTITY.replace_all(s, |caps: &Captures<'_>| {
        let name = &caps[1];
        match name {
            "amp" | "lt" | "gt" | "quot" | "apos" => caps[0].to_string(),
            _ => match html_entity(name) {
                Some(code) => format!("&#{code};"),
                None => format!("&amp;{name};"),
            },
        }
    })
}

/// Latin-1 names in code point order, starting at U+00A0.
const LATIN1: [&str; 96] = [
    "nbsp", "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect", "uml", "copy", "ordf", "laquo", "not", "shy",
    "reg", "macr", "deg", "plusmn", "sup2", "sup3", "acute", "micro", "para", "middot", "cedil", "sup1", "ordm",
    "raquo", "frac14", "frac12", "frac34", "iquest", "Agrave", "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig",
    "Ccedil", "Egrave", "Eacute", "Ecirc", "Euml", "Igrave", "Iacute", "Icirc", "Iuml", "ETH", "Ntilde", "Ograve",
    "Oacute", "Ocirc", "Otilde", "Ouml", "times", "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml", "Yacute", "THORN",
    "szlig", "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig", "ccedil", "egrave", "eacute", "ecirc",
    "euml", "igrave", "iacute", "icirc", "iuml", "eth", "ntilde", "ograve", "oacute", "ocirc", "otilde", "ouml",
    "divide", "oslash", "ugrave", "uacute", "ucirc", "uuml", "yacute", "thorn", "yuml",
];

fn html_entity(name: &str) -> Option<u32> {
    if let Some(offset) = LATIN1.iter().position(|n| *n == name) {
        return Some(0xA0 + offset as u32);
    }
    let code = match name {
        "OElig" => 338,
        "oelig" => 339,
        "Scaron" => 352,
        "scaron" => 353,
        "Yuml" => 376,
        "fnof" => 402,
        "circ" => 710,
        "tilde" => 732,
        "ensp" => 8194,
        "emsp" => 8195,
        "thinsp" => 8201,
        "zwnj" => 8204,
        "zwj" => 8205,
        "lrm" => 8206,
        "rlm" => 8207,
        "ndash" => 8211,
        "mdash" => 8212,
        "lsquo" => 8216,
        "rsquo" => 8217,
        "sbquo" => 8218,
        "ldquo" => 8220,
        "rdquo" => 8221,
        "bdquo" => 8222,
        "dagger" => 8224,
        "Dagger" => 8225,
        "bull" => 8226,
        "hellip" => 8230,
        "permil" => 8240,
        "prime" => 8242,
        "Prime" => 8243,
        "lsaquo" => 8249,
        "rsaquo" => 8250,
        "euro" => 8364,
        "trade" => 8482,
        _ => return None,
    };
    Some(code)
}

/// Re-serialize the document without extension elements.
///
/// An element is an extension when its name carries a prefix other than the
/// root element's own. Children of an Atom `type="xhtml"` text construct are
/// unwrapped so only their text reaches the deserializer.
fn strip_extensions(xml: &str) -> Result<String, FetchError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut root_prefix: Option<Option<Vec<u8>>> = None;
    // depth inside a dropped extension element
    let mut skipping = 0usize;
    // depth inside an xhtml text construct
    let mut flattening = 0usize;

    loop {
        let event = reader.read_event().map_err(payload_error)?;
        if let Event::Eof = event {
            break;
        }
        if skipping > 0 {
            match event {
                Event::Start(_) => skipping += 1,
                Event::End(_) => skipping -= 1,
                _ => {}
            }
            continue;
        }
        let event = match event {
            Event::Start(_) | Event::Empty(_) | Event::End(_) if flattening > 0 => match event {
                Event::Start(_) => {
                    flattening += 1;
                    Event::Text(BytesText::new(" "))
                }
                Event::Empty(_) => Event::Text(BytesText::new(" ")),
                _ => {
                    flattening -= 1;
                    if flattening > 0 {
                        continue;
                    }
                    event
                }
            },
            Event::Start(e) => {
                let root = root_prefix.get_or_insert_with(|| prefix_of(&e).map(<[u8]>::to_vec));
                if is_extension(&e, root.as_deref()) {
                    skipping = 1;
                    continue;
                }
                if is_xhtml(&e)? {
                    flattening = 1;
                }
                Event::Start(e)
            }
            Event::Empty(e) => {
                if root_prefix.as_ref().is_some_and(|root| is_extension(&e, root.as_deref())) {
                    continue;
                }
                Event::Empty(e)
            }
            other => other,
        };
        writer.write_event(event).map_err(payload_error)?;
    }

    String::from_utf8(writer.into_inner()).map_err(payload_error)
}

fn prefix_of<'a>(e: &'a BytesStart<'_>) -> Option<&'a [u8]> {
    let name = e.name().into_inner();
    name.iter().position(|b| *b == b':').map(|at| &name[..at])
}

fn is_extension(e: &BytesStart<'_>, root_prefix: Option<&[u8]>) -> bool {
    prefix_of(e).is_some_and(|prefix| Some(prefix) != root_prefix)
}

fn is_xhtml(e: &BytesStart<'_>) -> Result<bool, FetchError> {
    let kind = e.try_get_attribute("type").map_err(payload_error)?;
    Ok(kind.is_some_and(|attr| &*attr.value == b"xhtml"))
}
