//! RSS 2.0 extraction.
//!
//! Field fallbacks implemented here, in priority order:
//! - full content: `content:encoded` is captured; the normalizer falls
//!   back to `description` when it is absent
//! - author: `<author>` wins over `<dc:creator>`
//!
//! Channel-level metadata (`title`, `description`, `link`,
//! `lastBuildDate`) is taken from direct children of `<channel>` only, so
//! an `<image><title>` block cannot shadow the channel title.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attr, text_of, RawFeed};
use crate::error::FeedError;
use crate::model::{FeedMeta, RawEnclosure, RawEntry};

/// Elements whose text content is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    ChannelTitle,
    ChannelDescription,
    ChannelLink,
    ChannelLastBuildDate,
    Title,
    Link,
    Description,
    ContentEncoded,
    PubDate,
    Author,
    DcCreator,
    Guid,
    Category,
}

/// Accumulates one `<item>` plus the author candidates whose precedence
/// is resolved at finalize time.
#[derive(Default)]
struct ItemState {
    entry: RawEntry,
    author: Option<String>,
    creator: Option<String>,
}

pub(super) fn parse(bytes: &[u8]) -> Result<RawFeed, FeedError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut buf = Vec::new();
    let mut feed = RawFeed::default();
    let mut item: Option<ItemState> = None;
    let mut stack: Vec<Vec<u8>> = Vec::new();

    // Active capture: (element qname, target, nested markup depth).
    // Markup inside a captured element is flattened to its text content.
    let mut capture: Option<(Vec<u8>, Target, usize)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if let Some((_, _, depth)) = capture.as_mut() {
                    *depth += 1;
                } else if name == b"item" && item.is_none() {
                    item = Some(ItemState::default());
                } else if let Some(target) =
                    target_for(&name, item.is_some(), stack.last().map(Vec::as_slice))
                {
                    capture = Some((name.clone(), target, 0));
                    text.clear();
                } else if name == b"enclosure" {
                    if let Some(state) = item.as_mut() {
                        set_enclosure(&mut state.entry, &e);
                    }
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if capture.is_none() && e.name().as_ref() == b"enclosure" {
                    if let Some(state) = item.as_mut() {
                        set_enclosure(&mut state.entry, &e);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if capture.is_some() {
                    text.push_str(&text_of(&e));
                }
            }
            Ok(Event::CData(e)) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name().as_ref().to_vec();
                stack.pop();

                let mut commit_now = false;
                if let Some((captured, _, depth)) = capture.as_mut() {
                    if *depth > 0 {
                        *depth -= 1;
                    } else if *captured == name {
                        commit_now = true;
                    }
                }

                if commit_now {
                    if let Some((_, target, _)) = capture.take() {
                        commit(target, &text, &mut feed.meta, item.as_mut());
                    }
                    text.clear();
                } else if name == b"item" {
                    if let Some(state) = item.take() {
                        finalize_item(state, &mut feed);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(FeedError::Malformed(e.to_string())),
        }
        buf.clear();
    }

    Ok(feed)
}

fn target_for(name: &[u8], in_item: bool, parent: Option<&[u8]>) -> Option<Target> {
    if in_item {
        if parent != Some(b"item".as_slice()) {
            return None;
        }
        match name {
            b"title" => Some(Target::Title),
            b"link" => Some(Target::Link),
            b"description" => Some(Target::Description),
            b"content:encoded" => Some(Target::ContentEncoded),
            b"pubDate" => Some(Target::PubDate),
            b"author" => Some(Target::Author),
            b"dc:creator" => Some(Target::DcCreator),
            b"guid" => Some(Target::Guid),
            b"category" => Some(Target::Category),
            _ => None,
        }
    } else {
        if parent != Some(b"channel".as_slice()) {
            return None;
        }
        match name {
            b"title" => Some(Target::ChannelTitle),
            b"description" => Some(Target::ChannelDescription),
            b"link" => Some(Target::ChannelLink),
            b"lastBuildDate" => Some(Target::ChannelLastBuildDate),
            _ => None,
        }
    }
}

fn commit(target: Target, raw: &str, meta: &mut FeedMeta, item: Option<&mut ItemState>) {
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    match (target, item) {
        (Target::ChannelTitle, _) => set_first(&mut meta.title, text),
        (Target::ChannelDescription, _) => set_first(&mut meta.description, text),
        (Target::ChannelLink, _) => set_first(&mut meta.link, text),
        (Target::ChannelLastBuildDate, _) => set_first(&mut meta.last_build_date, text),
        (Target::Title, Some(s)) => set_first(&mut s.entry.title, text),
        (Target::Link, Some(s)) => set_first(&mut s.entry.link, text),
        (Target::Description, Some(s)) => set_first(&mut s.entry.description, text),
        (Target::ContentEncoded, Some(s)) => set_first(&mut s.entry.content, text),
        (Target::PubDate, Some(s)) => set_first(&mut s.entry.published, text),
        (Target::Author, Some(s)) => set_first(&mut s.author, text),
        (Target::DcCreator, Some(s)) => set_first(&mut s.creator, text),
        (Target::Guid, Some(s)) => set_first(&mut s.entry.guid, text),
        (Target::Category, Some(s)) => s.entry.categories.push(text.to_string()),
        _ => {}
    }
}

/// First occurrence wins, matching DOM-style first-node lookup.
fn set_first(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

/// A single enclosure per entry; later ones are ignored.
fn set_enclosure(entry: &mut RawEntry, e: &BytesStart) {
    if entry.enclosure.is_some() {
        return;
    }
    entry.enclosure = Some(RawEnclosure {
        url: attr(e, b"url"),
        mime_type: attr(e, b"type"),
        length: attr(e, b"length"),
    });
}

fn finalize_item(state: ItemState, feed: &mut RawFeed) {
    let ItemState {
        mut entry,
        author,
        creator,
    } = state;
    entry.author = author.or(creator);
    if entry.is_droppable() {
        feed.skipped += 1;
    } else {
        feed.entries.push(entry);
    }
}
