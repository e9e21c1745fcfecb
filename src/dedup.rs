//! Item identity and upsert policy.
//!
//! Identity key is `(site_id, guid)`. Re-seeing a known identity is an
//! update, not a duplicate: publishers legitimately edit titles and
//! bodies after the fact. The one field that never moves backwards is
//! `published_at` — a date the normalizer inferred at ingestion time must
//! not overwrite a date that came from the source.

use crate::model::Item;

/// What the caller should do with an incoming item.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertPlan {
    /// New identity: insert, and count it toward the new-item total.
    Insert(Item),
    /// Known identity: refresh mutable fields; does not count as new.
    Update(Item),
}

impl UpsertPlan {
    pub fn is_insert(&self) -> bool {
        matches!(self, UpsertPlan::Insert(_))
    }

    pub fn into_item(self) -> Item {
        match self {
            UpsertPlan::Insert(item) | UpsertPlan::Update(item) => item,
        }
    }
}

/// Decide between insert and update for one incoming item.
///
/// `existing` is the stored item under the same `(site_id, guid)` key, if
/// any. Callers must not look up synthetic identities at all (see
/// [`crate::model::Identity::is_stable`]); if one is passed here anyway it
/// is force-inserted, because an unstable guid matching a stored row is a
/// coincidence, not a re-seen entry.
pub fn plan_upsert(existing: Option<&Item>, incoming: &Item) -> UpsertPlan {
    if !incoming.identity.is_stable() {
        return UpsertPlan::Insert(incoming.clone());
    }

    match existing {
        None => UpsertPlan::Insert(incoming.clone()),
        Some(stored) => UpsertPlan::Update(merge(stored, incoming)),
    }
}

/// Refresh the stored record's content fields from the latest parse,
/// keeping the original publication instant unless the source supplied a
/// genuinely parsed (non-inferred) date.
fn merge(stored: &Item, incoming: &Item) -> Item {
    let (published_at, date_inferred) = if incoming.date_inferred {
        (stored.published_at, stored.date_inferred)
    } else {
        (incoming.published_at, false)
    };

    Item {
        guid: stored.guid.clone(),
        title: incoming.title.clone(),
        link: incoming.link.clone(),
        description: incoming.description.clone(),
        content: incoming.content.clone(),
        author: incoming.author.clone(),
        published_at,
        categories: incoming.categories.clone(),
        enclosure: incoming.enclosure.clone(),
        identity: stored.identity,
        date_inferred,
    }
}
