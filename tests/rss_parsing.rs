//! Integration tests for RSS parsing against a realistic podcast feed.
//!
//! The fixture mixes namespaces, CDATA, fallback fields and a handful of
//! broken episodes that must be skipped without failing the feed.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use podcrawl::feed::{make_content_hash, parse_rss, RssParserError};

const FIXTURE: &[u8] = include_bytes!("fixtures/podcast.xml");

#[test]
fn test_channel_fields() {
    let feed = parse_rss(FIXTURE).unwrap();

    assert_eq!(feed.title, "The Night Sky Hour");
    assert_eq!(feed.link.as_deref(), Some("https://nightsky.example.com/"));
    assert_eq!(feed.language, "en");
    assert_eq!(
        feed.description,
        "Astronomy for curious people: telescopes, comets and the history of stargazing."
    );
    assert_eq!(feed.owner, "Ada Observatory");
    assert_eq!(
        feed.cover_url.as_deref(),
        Some("https://nightsky.example.com/cover.jpg")
    );
    assert_eq!(feed.funding_text, "Support the show");
    assert_eq!(
        feed.funding_url.as_deref(),
        Some("https://nightsky.example.com/support")
    );
    assert!(!feed.explicit);
    assert!(!feed.complete);
    assert_eq!(feed.categories, vec!["Education", "Science", "Astronomy"]);
}

#[test]
fn test_only_valid_items_survive() {
    let feed = parse_rss(FIXTURE).unwrap();

    let guids: Vec<&str> = feed.items.iter().map(|i| i.guid.as_str()).collect();
    assert_eq!(guids, vec!["nightsky-042", "nightsky-041", "nightsky-040"]);
    assert_eq!(
        feed.pub_date(),
        Some(Utc.with_ymd_and_hms(2024, 5, 14, 6, 0, 0).unwrap())
    );
}

#[test]
fn test_fully_populated_item() {
    let feed = parse_rss(FIXTURE).unwrap();
    let item = &feed.items[0];

    assert_eq!(item.title, "Comets & Their Tails");
    assert_eq!(
        item.link.as_deref(),
        Some("https://nightsky.example.com/episodes/42")
    );
    assert_eq!(item.description, "<p>Why do comets grow <b>two</b> tails?</p>");
    assert_eq!(item.media_url, "https://cdn.example.com/nightsky/042.mp3");
    assert_eq!(item.media_type, "audio/mpeg");
    assert_eq!(item.length, Some(48_213_760));
    assert_eq!(item.duration, "50:12");
    assert_eq!(item.episode, Some(42));
    assert_eq!(item.season, Some(3));
    assert_eq!(item.episode_type, "full");
    assert!(item.explicit);
    assert_eq!(
        item.cover_url.as_deref(),
        Some("https://nightsky.example.com/42.jpg")
    );
    assert_eq!(item.keywords(), "Comets Solar System");
}

#[test]
fn test_fallbacks_and_coercions() {
    let feed = parse_rss(FIXTURE).unwrap();

    let telescope = &feed.items[1];
    assert_eq!(telescope.description, "Refractors, reflectors and what to avoid.");
    assert_eq!(telescope.length, None);
    assert_eq!(telescope.episode_type, "trailer");
    assert_eq!(
        telescope.pub_date,
        Utc.with_ymd_and_hms(2024, 5, 7, 4, 0, 0).unwrap()
    );

    let astrolabe = &feed.items[2];
    assert_eq!(astrolabe.description, "");
    assert_eq!(astrolabe.episode_type, "full");
    assert_eq!(astrolabe.episode, None);
    assert!(astrolabe.categories.is_empty());
}

#[test]
fn test_parsing_is_deterministic() {
    assert_eq!(parse_rss(FIXTURE).unwrap(), parse_rss(FIXTURE).unwrap());
    assert_eq!(make_content_hash(FIXTURE), make_content_hash(FIXTURE));
}

#[test]
fn test_truncated_document_is_rejected() {
    let truncated = &FIXTURE[..FIXTURE.len() / 2];
    assert!(matches!(
        parse_rss(truncated),
        Err(RssParserError::Xml(_))
    ));
}

#[test]
fn test_atom_only_document_is_rejected() {
    let atom = br#"<?xml version="1.0"?>
        <feed xmlns="http://www.w3.org/2005/Atom"><title>Atom</title></feed>"#;
    assert!(matches!(parse_rss(atom), Err(RssParserError::MissingChannel)));
}

fn channel_with(items: &str) -> String {
    format!(
        r#"<rss version="2.0"><channel><title>Prop</title>{items}</channel></rss>"#
    )
}

fn valid_item(n: usize) -> String {
    format!(
        r#"<item><guid>g{n}</guid><title>T{n}</title><pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate><enclosure url="https://x.example.com/{n}.mp3" type="audio/mpeg"/></item>"#
    )
}

proptest! {
    /// Broken items never cost the valid ones.
    #[test]
    fn prop_broken_items_are_skipped(layout in prop::collection::vec(any::<bool>(), 0..20)) {
        let mut body = String::new();
        let mut expected = Vec::new();
        for (n, valid) in layout.iter().enumerate() {
            if *valid {
                body.push_str(&valid_item(n));
                expected.push(format!("g{n}"));
            } else {
                body.push_str(&format!("<item><guid>b{n}</guid><title>broken</title><pubDate>??</pubDate></item>"));
            }
        }

        let feed = parse_rss(channel_with(&body).as_bytes()).unwrap();
        let guids: Vec<String> = feed.items.into_iter().map(|i| i.guid).collect();
        prop_assert_eq!(guids, expected);
    }
}
