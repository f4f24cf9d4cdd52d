//! Tag automation and batch plans.
//!
//! A [`Plan`] bundles the changes a rule wants applied to a card: tags to
//! add or remove, a favorite flag, an externally sourced tag list to fold
//! in, and a destination folder. Attributes are applied first and the move
//! last, because moving changes the card's id.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cards::{self, AttributeChange, CardStore};
use crate::error::StoreError;
use crate::ui_store::UiStore;

/// Filters and rewrites incoming tags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagProcessor {
    /// Tags dropped outright.
    pub exclude: HashSet<String>,
    /// Tag renames, applied after exclusion.
    pub replace: HashMap<String, String>,
}

impl TagProcessor {
    /// Drop excluded tags, apply replacements and de-duplicate, keeping
    /// first-seen order.
    #[must_use]
    pub fn process(&self, tags: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for tag in tags {
            if self.exclude.contains(tag) {
                debug!(tag = %tag, "tag excluded");
                continue;
            }
            let tag = self.replace.get(tag).unwrap_or(tag);
            if !out.contains(tag) {
                out.push(tag.clone());
            }
        }
        out
    }
}

/// How processed tags combine with a card's existing tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Append new tags not already present, ignoring case.
    #[default]
    Merge,
    /// Use the new tags as the complete list.
    Replace,
}

/// Combine tag lists according to `mode`.
#[must_use]
pub fn merge_tags(existing: &[String], new: &[String], mode: MergeMode) -> Vec<String> {
    match mode {
        MergeMode::Replace => new.to_vec(),
        MergeMode::Merge => {
            let mut merged = existing.to_vec();
            for tag in new {
                let lower = tag.to_lowercase();
                if !merged.iter().any(|t| t.to_lowercase() == lower) {
                    merged.push(tag.clone());
                }
            }
            merged
        }
    }
}

/// Tags from an outside source, run through a processor and merged in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagSource {
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub processor: TagProcessor,
    pub merge_mode: MergeMode,
}

/// Changes to apply to one card.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Plan {
    /// Destination folder; `Some("")` moves to the root.
    pub move_to: Option<String>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub favorite: Option<bool>,
    pub tag_source: Option<TagSource>,
}

/// What [`apply_plan`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanOutcome {
    /// The card's id after the plan, which differs from the input when moved.
    pub final_id: String,
    pub moved_to: Option<String>,
    pub tags_added: Vec<String>,
    pub tags_removed: Vec<String>,
    pub favorite_changed: bool,
    /// Why the move was skipped, if it was.
    pub move_error: Option<String>,
}

/// Apply `plan` to the card `id`.
///
/// A failed move (for example a name clash in the destination) is reported
/// in [`PlanOutcome::move_error`] instead of failing the attribute changes
/// already written. When `ui` is given, the card's UI metadata follows it.
///
/// # Errors
///
/// [`StoreError`] if the card cannot be read or its attributes written.
pub async fn apply_plan(
    store: &CardStore,
    ui: Option<&UiStore>,
    id: &str,
    plan: &Plan,
) -> Result<PlanOutcome, StoreError> {
    let mut outcome = PlanOutcome {
        final_id: id.to_owned(),
        ..PlanOutcome::default()
    };

    let mut add_tags = plan.add_tags.clone();
    let mut remove_tags = plan.remove_tags.clone();

    if let Some(source) = &plan.tag_source {
        let existing = cards::card_tags(&store.get(id).await?.card);
        let processed = source.processor.process(&source.tags);
        let merged = merge_tags(&existing, &processed, source.merge_mode);
        add_tags.extend(merged.iter().filter(|t| !existing.contains(t)).cloned());
        remove_tags.extend(existing.iter().filter(|t| !merged.contains(t)).cloned());
    }

    if !add_tags.is_empty() || !remove_tags.is_empty() || plan.favorite.is_some() {
        let change = AttributeChange {
            add_tags,
            remove_tags,
            favorite: plan.favorite,
        };
        store.modify_attributes(id, &change).await?;
        outcome.tags_added = change.add_tags;
        outcome.tags_removed = change.remove_tags;
        outcome.favorite_changed = change.favorite.is_some();
    }

    if let Some(folder) = &plan.move_to {
        match store.move_card(id, folder).await {
            Ok(new_id) => {
                if new_id != id {
                    if let Some(ui) = ui {
                        if let Err(e) = ui.rename(id, &new_id).await {
                            warn!(id = %id, error = %e, "failed to move ui metadata");
                        }
                    }
                }
                outcome.final_id = new_id;
                outcome.moved_to = Some(folder.clone());
            }
            Err(e) => {
                warn!(id = %id, error = %e, "plan move failed");
                outcome.move_error = Some(e.to_string());
            }
        }
    }

    Ok(outcome)
}
