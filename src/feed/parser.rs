use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
/// Element nesting beyond this rejects the document
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The bytes are not an RSS document with a channel/item hierarchy
    #[error("Malformed feed document: {0}")]
    Malformed(String),
}

impl From<quick_xml::Error> for ParseError {
    fn from(err: quick_xml::Error) -> Self {
        ParseError::Malformed(err.to_string())
    }
}

/// One `<item>` of a feed document, text fields already unescaped.
///
/// `pub_date` is kept verbatim; turning it into a timestamp is the date
/// normalizer's job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// Channel metadata plus entries in document order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    pub entries: Vec<RawEntry>,
}

// ============================================================================
// Element Tracking
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    PubDate,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"description" => Some(Field::Description),
            b"pubDate" => Some(Field::PubDate),
            _ => None,
        }
    }
}

/// Role of an open element in the `rss > channel > item > field` hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Root,
    Channel,
    Item,
    Field(Field),
    Other,
}

/// Classify a start tag from its parent and its un-prefixed name.
///
/// Only the first `<channel>` under the root counts; fields are direct
/// children of the channel or of an item.
fn child_node(parent: Option<Node>, name: Option<&[u8]>, channel_seen: bool) -> Node {
    match (parent, name) {
        (None, _) => Node::Root,
        (Some(Node::Root), Some(b"channel")) if !channel_seen => Node::Channel,
        (Some(Node::Channel), Some(b"item")) => Node::Item,
        (Some(Node::Channel | Node::Item), Some(name)) => {
            Field::from_name(name).map_or(Node::Other, Node::Field)
        }
        _ => Node::Other,
    }
}

/// Name of an element in the default namespace. Prefixed siblings such as
/// `atom:link` or `itunes:title` yield `None`.
fn unprefixed<'a>(e: &'a BytesStart<'_>) -> Option<&'a [u8]> {
    let name = e.name();
    match name.prefix() {
        Some(_) => None,
        None => Some(name.into_inner()),
    }
}

/// First non-empty value seen for each field
#[derive(Debug, Default)]
struct Fields {
    title: String,
    link: String,
    description: String,
    pub_date: String,
}

impl Fields {
    fn set(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Description => &mut self.description,
            Field::PubDate => &mut self.pub_date,
        };
        if slot.is_empty() {
            *slot = value.to_string();
        }
    }

    fn into_entry(self) -> RawEntry {
        RawEntry {
            title: unescape(self.title),
            link: self.link,
            description: unescape(self.description),
            pub_date: self.pub_date,
        }
    }
}

/// Decode HTML entities left over after XML unescaping (double-encoded text)
fn unescape(text: String) -> String {
    match html_escape::decode_html_entities(&text) {
        std::borrow::Cow::Borrowed(_) => text,
        std::borrow::Cow::Owned(decoded) => decoded,
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse an RSS document.
///
/// The root element name is not checked; it must contain a `<channel>` with
/// zero or more `<item>` children. Unknown and namespaced elements are
/// skipped, and text inside child markup of a field is concatenated. When a
/// field repeats, the first non-empty value wins. Titles and descriptions of
/// the channel and of every entry are HTML-unescaped. Entry order is
/// preserved.
///
/// # Errors
///
/// [`ParseError::Malformed`] if the bytes are not UTF-8, not well-formed XML,
/// or have no `<channel>`.
pub fn parse_document(bytes: &[u8]) -> Result<RawFeedDocument, ParseError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ParseError::Malformed(format!("document is not valid UTF-8: {}", e)))?;

    // quick-xml (0.37) never expands <!ENTITY> declarations, so DOCTYPE
    // entities cannot inject content.
    let mut reader = Reader::from_str(text);

    let mut buf = Vec::new();
    let mut stack: Vec<Node> = Vec::new();
    let mut channel: Option<Fields> = None;
    let mut item: Option<Fields> = None;
    let mut entries = Vec::new();
    let mut value = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::Malformed(format!(
                        "elements nested deeper than {MAX_DEPTH} levels"
                    )));
                }
                let node = child_node(stack.last().copied(), unprefixed(&e), channel.is_some());
                match node {
                    Node::Channel => channel = Some(Fields::default()),
                    Node::Item => item = Some(Fields::default()),
                    Node::Field(_) => value.clear(),
                    _ => {}
                }
                stack.push(node);
            }
            Ok(Event::Empty(e)) => {
                let node = child_node(stack.last().copied(), unprefixed(&e), channel.is_some());
                match node {
                    Node::Channel => channel = Some(Fields::default()),
                    Node::Item => entries.push(RawEntry::default()),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_field(&stack) => match e.unescape() {
                Ok(text) => value.push_str(&text),
                // Unknown entities (`&nbsp;`) are left for the HTML unescape pass
                Err(_) => value.push_str(&String::from_utf8_lossy(&e)),
            },
            Ok(Event::CData(e)) if in_field(&stack) => {
                value.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::End(_)) => match stack.pop() {
                Some(Node::Field(field)) => {
                    let target = if stack.last() == Some(&Node::Item) {
                        item.as_mut()
                    } else {
                        channel.as_mut()
                    };
                    if let Some(fields) = target {
                        fields.set(field, value.trim());
                    }
                }
                Some(Node::Item) => {
                    if let Some(fields) = item.take() {
                        entries.push(fields.into_entry());
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ParseError::Malformed(
            "document ended inside an open element".to_string(),
        ));
    }
    let Some(channel) = channel else {
        return Err(ParseError::Malformed(
            "document has no <channel> element".to_string(),
        ));
    };

    Ok(RawFeedDocument {
        title: unescape(channel.title),
        link: channel.link,
        description: unescape(channel.description),
        entries,
    })
}

fn in_field(stack: &[Node]) -> bool {
    stack.iter().any(|node| matches!(node, Node::Field(_)))
}
