use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::date_parser::parse_date;
use super::models::{
    parse_complete, parse_explicit, parse_int, parse_language, parse_url, required, Feed, Item,
    ValidationError, DEFAULT_EPISODE_TYPE,
};
use crate::util::strip_control_chars;
use crate::xml::{find_first, Element, FieldPaths, Namespaces, XPath, XPathFinder, XmlError};

/// Namespaces every feed lookup may use.
pub const NAMESPACES: &[(&str, &str)] = &[
    ("atom", "http://www.w3.org/2005/Atom"),
    ("content", "http://purl.org/rss/1.0/modules/content/"),
    ("googleplay", "http://www.google.com/schemas/play-podcasts/1.0"),
    ("itunes", "http://www.itunes.com/dtds/podcast-1.0.dtd"),
    ("media", "http://search.yahoo.com/mrss/"),
    ("podcast", "https://podcastindex.org/namespace/1.0"),
];

/// Errors that make a whole document unusable.
#[derive(Debug, Error)]
pub enum RssParserError {
    #[error("invalid XML: {0}")]
    Xml(#[from] XmlError),

    #[error("document does not contain a <channel> element")]
    MissingChannel,

    #[error("invalid feed: {0}")]
    InvalidField(#[from] ValidationError),
}

// ============================================================================
// Extraction tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FeedField {
    Complete,
    CoverUrl,
    Description,
    Explicit,
    FundingText,
    FundingUrl,
    Language,
    Link,
    Owner,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ItemField {
    CoverUrl,
    Description,
    Duration,
    Episode,
    EpisodeType,
    Explicit,
    Guid,
    Length,
    Link,
    MediaType,
    MediaUrl,
    PubDate,
    Season,
    Title,
}

const FEED_FIELDS: &[(FeedField, &[&str])] = &[
    (FeedField::Complete, &["itunes:complete/text()"]),
    (FeedField::CoverUrl, &["itunes:image/@href", "image/url/text()"]),
    (FeedField::Description, &["description/text()", "itunes:summary/text()"]),
    (FeedField::Explicit, &["itunes:explicit/text()"]),
    (FeedField::FundingText, &["podcast:funding/text()"]),
    (FeedField::FundingUrl, &["podcast:funding/@url"]),
    (FeedField::Language, &["language/text()"]),
    (FeedField::Link, &["link/text()"]),
    (
        FeedField::Owner,
        &["itunes:author/text()", "itunes:owner/itunes:name/text()"],
    ),
    (FeedField::Title, &["title/text()"]),
];

/// Feed categories concatenate across all of these, in order.
const FEED_CATEGORIES: &[&str] = &[
    "//googleplay:category/@text",
    "//itunes:category/@text",
    "//media:category/@label",
    "//media:category/text()",
];

const ITEM_FIELDS: &[(ItemField, &[&str])] = &[
    (ItemField::CoverUrl, &["itunes:image/@href"]),
    (
        ItemField::Description,
        &[
            "content:encoded/text()",
            "description/text()",
            "itunes:summary/text()",
        ],
    ),
    (ItemField::Duration, &["itunes:duration/text()"]),
    (ItemField::Episode, &["itunes:episode/text()"]),
    (
        ItemField::EpisodeType,
        &["itunes:episodeType/text()", "itunes:episodetype/text()"],
    ),
    (ItemField::Explicit, &["itunes:explicit/text()"]),
    (ItemField::Guid, &["guid/text()"]),
    (
        ItemField::Length,
        &["enclosure//@length", "media:content//@fileSize"],
    ),
    (ItemField::Link, &["link/text()"]),
    (
        ItemField::MediaType,
        &["enclosure//@type", "media:content//@type"],
    ),
    (
        ItemField::MediaUrl,
        &["enclosure//@url", "media:content//@url"],
    ),
    (ItemField::PubDate, &["pubDate/text()", "pubdate/text()"]),
    (ItemField::Season, &["itunes:season/text()"]),
    (ItemField::Title, &["title/text()"]),
];

const ITEM_CATEGORIES: &[&str] = &["category/text()"];

/// The compiled form of the tables above.
struct Tables {
    namespaces: Namespaces,
    feed: FieldPaths<FeedField>,
    feed_categories: Vec<XPath>,
    item: FieldPaths<ItemField>,
    item_categories: Vec<XPath>,
}

impl Tables {
    fn compile() -> Result<Self, XmlError> {
        let namespaces = Namespaces::from_pairs(NAMESPACES);
        let paths = |exprs: &[&str]| {
            exprs
                .iter()
                .map(|expr| XPath::compile(expr, &namespaces))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            feed: FieldPaths::compile(FEED_FIELDS, &namespaces)?,
            feed_categories: paths(FEED_CATEGORIES)?,
            item: FieldPaths::compile(ITEM_FIELDS, &namespaces)?,
            item_categories: paths(ITEM_CATEGORIES)?,
            namespaces,
        })
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses an RSS document into a [`Feed`].
///
/// Only the first `<channel>` is read. Items that fail validation (no guid,
/// no usable media URL, unparseable or future publication date) are skipped;
/// the feed itself is rejected only if the XML is broken, the channel is
/// missing or the channel has no title.
///
/// # Errors
///
/// Returns [`RssParserError`] for malformed XML, a missing `<channel>` or a
/// channel without a title.
pub fn parse_rss(content: &[u8]) -> Result<Feed, RssParserError> {
    parse_rss_at(content, Utc::now())
}

/// [`parse_rss`] with an explicit clock for rejecting future-dated items.
pub fn parse_rss_at(content: &[u8], now: DateTime<Utc>) -> Result<Feed, RssParserError> {
    let tables = Tables::compile()?;
    let channel =
        find_first(content, "channel", &tables.namespaces)?.ok_or(RssParserError::MissingChannel)?;

    let finder = XPathFinder::new(&channel);
    let mut values = finder.extract(&tables.feed);
    let mut take = |field| values.remove(&field);

    let title = required(take(FeedField::Title), "title")?;
    let items = parse_items(&channel, &tables, now);

    Ok(Feed {
        title: strip_control_chars(&title).into_owned(),
        description: take(FeedField::Description).unwrap_or_default(),
        owner: take(FeedField::Owner)
            .map(|owner| strip_control_chars(&owner).into_owned())
            .unwrap_or_default(),
        link: parse_url(take(FeedField::Link).as_deref()),
        language: parse_language(take(FeedField::Language).as_deref()),
        cover_url: parse_url(take(FeedField::CoverUrl).as_deref()),
        funding_text: take(FeedField::FundingText).unwrap_or_default(),
        funding_url: parse_url(take(FeedField::FundingUrl).as_deref()),
        explicit: parse_explicit(take(FeedField::Explicit).as_deref()),
        complete: parse_complete(take(FeedField::Complete).as_deref()),
        categories: finder.all(&tables.feed_categories),
        items,
    })
}

fn parse_items(channel: &Element, tables: &Tables, now: DateTime<Utc>) -> Vec<Item> {
    channel
        .children
        .iter()
        .filter(|child| child.name.namespace.is_none() && child.name.local == "item")
        .filter_map(|element| match parse_item(element, tables, now) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping invalid feed item");
                None
            }
        })
        .collect()
}

fn parse_item(element: &Element, tables: &Tables, now: DateTime<Utc>) -> Result<Item, ValidationError> {
    let finder = XPathFinder::new(element);
    let mut values: HashMap<ItemField, String> = finder.extract(&tables.item);
    let mut take = |field| values.remove(&field);

    let guid = required(take(ItemField::Guid), "guid")?;
    let title = required(take(ItemField::Title), "title")?;

    let raw_date = required(take(ItemField::PubDate), "pub_date")?;
    let pub_date = parse_date(&raw_date)
        .filter(|date| *date <= now)
        .ok_or_else(|| ValidationError::Invalid {
            field: "pub_date",
            value: raw_date.clone(),
        })?;

    let raw_media_url = required(take(ItemField::MediaUrl), "media_url")?;
    let media_url = parse_url(Some(raw_media_url.as_str())).ok_or(ValidationError::Invalid {
        field: "media_url",
        value: raw_media_url,
    })?;

    Ok(Item {
        guid,
        title: strip_control_chars(&title).into_owned(),
        link: parse_url(take(ItemField::Link).as_deref()),
        media_url,
        media_type: take(ItemField::MediaType).unwrap_or_default(),
        length: parse_int(take(ItemField::Length).as_deref()),
        duration: take(ItemField::Duration).unwrap_or_default(),
        episode: parse_int(take(ItemField::Episode).as_deref()),
        season: parse_int(take(ItemField::Season).as_deref()),
        episode_type: take(ItemField::EpisodeType)
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| DEFAULT_EPISODE_TYPE.to_owned()),
        explicit: parse_explicit(take(ItemField::Explicit).as_deref()),
        description: take(ItemField::Description).unwrap_or_default(),
        pub_date,
        categories: finder.all(&tables.item_categories),
        cover_url: parse_url(take(ItemField::CoverUrl).as_deref()),
    })
}
