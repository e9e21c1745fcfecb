//! Atom extraction.
//!
//! Field mapping implemented here, per entry:
//! - link: the `rel="alternate"` link wins; otherwise the first link seen
//! - description: `<summary>`; full content: `<content>`
//! - timestamp: `<published>` wins over `<updated>`
//! - author: the nested `<author><name>` text
//! - categories: the `term` attribute of each `<category>`
//!
//! Element names are matched by local name so prefixed documents
//! (`<atom:feed>`) extract the same way as default-namespace ones.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attr, text_of, RawFeed};
use crate::error::FeedError;
use crate::model::RawEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    FeedTitle,
    FeedSubtitle,
    Title,
    Summary,
    Content,
    Published,
    Updated,
    Id,
    AuthorName,
}

/// Accumulates one `<entry>`; link and timestamp preferences are resolved
/// at finalize time, once all candidates are known.
#[derive(Default)]
struct EntryState {
    entry: RawEntry,
    /// `(rel, href)` pairs in document order.
    links: Vec<(Option<String>, String)>,
    published: Option<String>,
    updated: Option<String>,
}

pub(super) fn parse(bytes: &[u8]) -> Result<RawFeed, FeedError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut buf = Vec::new();
    let mut feed = RawFeed::default();
    let mut entry: Option<EntryState> = None;
    let mut feed_links: Vec<(Option<String>, String)> = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();

    let mut capture: Option<(Vec<u8>, Target, usize)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                if let Some((_, _, depth)) = capture.as_mut() {
                    *depth += 1;
                } else if local == b"entry" && entry.is_none() {
                    entry = Some(EntryState::default());
                } else if let Some(target) =
                    target_for(&local, entry.is_some(), stack.last().map(Vec::as_slice))
                {
                    capture = Some((local.clone(), target, 0));
                    text.clear();
                } else {
                    collect_attribute_element(&local, &e, entry.as_mut(), &mut feed_links);
                }
                stack.push(local);
            }
            Ok(Event::Empty(e)) => {
                if capture.is_none() {
                    let local = e.local_name().as_ref().to_vec();
                    collect_attribute_element(&local, &e, entry.as_mut(), &mut feed_links);
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
                let local = e.local_name().as_ref().to_vec();
                stack.pop();

                let mut commit_now = false;
                if let Some((captured, _, depth)) = capture.as_mut() {
                    if *depth > 0 {
                        *depth -= 1;
                    } else if *captured == local {
                        commit_now = true;
                    }
                }

                if commit_now {
                    if let Some((_, target, _)) = capture.take() {
                        commit(target, &text, &mut feed, entry.as_mut());
                    }
                    text.clear();
                } else if local == b"entry" {
                    if let Some(state) = entry.take() {
                        finalize_entry(state, &mut feed);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(FeedError::Malformed(e.to_string())),
        }
        buf.clear();
    }

    // Feed-level metadata: the self-referential link, else the first one
    feed.meta.link = pick_link(&feed_links, "self");

    Ok(feed)
}

fn target_for(local: &[u8], in_entry: bool, parent: Option<&[u8]>) -> Option<Target> {
    if in_entry {
        if parent == Some(b"author".as_slice()) {
            return (local == b"name").then_some(Target::AuthorName);
        }
        if parent != Some(b"entry".as_slice()) {
            return None;
        }
        match local {
            b"title" => Some(Target::Title),
            b"summary" => Some(Target::Summary),
            b"content" => Some(Target::Content),
            b"published" => Some(Target::Published),
            b"updated" => Some(Target::Updated),
            b"id" => Some(Target::Id),
            _ => None,
        }
    } else {
        if parent != Some(b"feed".as_slice()) {
            return None;
        }
        match local {
            b"title" => Some(Target::FeedTitle),
            b"subtitle" => Some(Target::FeedSubtitle),
            _ => None,
        }
    }
}

/// `<link>` and `<category>` carry their data in attributes and commonly
/// appear as empty elements.
fn collect_attribute_element(
    local: &[u8],
    e: &BytesStart,
    entry: Option<&mut EntryState>,
    feed_links: &mut Vec<(Option<String>, String)>,
) {
    match local {
        b"link" => {
            if let Some(href) = attr(e, b"href") {
                let rel = attr(e, b"rel");
                match entry {
                    Some(state) => state.links.push((rel, href)),
                    None => feed_links.push((rel, href)),
                }
            }
        }
        b"category" => {
            if let (Some(state), Some(term)) = (entry, attr(e, b"term")) {
                state.entry.categories.push(term);
            }
        }
        _ => {}
    }
}

fn commit(target: Target, raw: &str, feed: &mut RawFeed, entry: Option<&mut EntryState>) {
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    match (target, entry) {
        (Target::FeedTitle, _) => set_first(&mut feed.meta.title, text),
        (Target::FeedSubtitle, _) => set_first(&mut feed.meta.description, text),
        (Target::Title, Some(s)) => set_first(&mut s.entry.title, text),
        (Target::Summary, Some(s)) => set_first(&mut s.entry.description, text),
        (Target::Content, Some(s)) => set_first(&mut s.entry.content, text),
        (Target::Published, Some(s)) => set_first(&mut s.published, text),
        (Target::Updated, Some(s)) => set_first(&mut s.updated, text),
        (Target::Id, Some(s)) => set_first(&mut s.entry.guid, text),
        (Target::AuthorName, Some(s)) => set_first(&mut s.entry.author, text),
        _ => {}
    }
}

fn set_first(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn pick_link(links: &[(Option<String>, String)], preferred_rel: &str) -> Option<String> {
    links
        .iter()
        .find(|(rel, _)| rel.as_deref() == Some(preferred_rel))
        .or_else(|| links.first())
        .map(|(_, href)| href.clone())
}

fn finalize_entry(state: EntryState, feed: &mut RawFeed) {
    let EntryState {
        mut entry,
        links,
        published,
        updated,
    } = state;
    entry.link = pick_link(&links, "alternate");
    entry.published = published.or(updated);
    if entry.is_droppable() {
        feed.skipped += 1;
    } else {
        feed.entries.push(entry);
    }
}
