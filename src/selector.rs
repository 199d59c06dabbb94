//! Backlog selection: decides which spec entry, if any, becomes the next
//! tracked item.
//!
//! The selector enforces the serial-processing rule by checking a freshly
//! read item list instead of an in-process flag, so concurrent evaluators
//! converge on the same answer.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::state_machine::{ItemState, WorkItem, blocked_group_of};

/// Which half of the system a spec entry verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    App,
    Api,
}

impl Domain {
    /// Base priority weight. App behavior ships before the API surface that
    /// reads it, so app entries always sort first.
    fn weight(self) -> u32 {
        match self {
            Domain::App => 0,
            Domain::Api => 1,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::App => write!(f, "app"),
            Domain::Api => write!(f, "api"),
        }
    }
}

/// One given/when/then acceptance scenario extracted from the spec corpus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpecEntry {
    pub id: String,
    pub title: String,
    pub given: String,
    pub when: String,
    pub then: String,
    pub domain: Domain,
}

/// Raw manifest shape on disk.
#[derive(Debug, Deserialize)]
struct Manifest {
    entries: Vec<SpecEntry>,
}

/// The ordered backlog, as loaded from the manifest file.
///
/// Manifest position is meaningful: it is the intra-domain ordering used by
/// [`select_next`].
#[derive(Debug, Clone)]
pub struct Backlog {
    entries: Vec<SpecEntry>,
}

impl Backlog {
    /// Build a backlog directly from entries, bypassing manifest validation.
    #[cfg(test)]
    pub(crate) fn from_entries(entries: Vec<SpecEntry>) -> Self {
        Self { entries }
    }

    /// Load and validate a backlog manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read backlog manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse backlog manifest {}", path.display()))?;

        if manifest.entries.is_empty() {
            bail!("backlog manifest {} has no entries", path.display());
        }
        let mut seen = BTreeSet::new();
        for entry in &manifest.entries {
            if !seen.insert(entry.id.as_str()) {
                bail!("backlog manifest contains duplicate spec id '{}'", entry.id);
            }
        }

        Ok(Self {
            entries: manifest.entries,
        })
    }

    pub fn entries(&self) -> &[SpecEntry] {
        &self.entries
    }

    pub fn find(&self, spec_id: &str) -> Option<&SpecEntry> {
        self.entries.iter().find(|e| e.id == spec_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Pick the next backlog entry to open an item for, or `None` when nothing
/// should start.
///
/// Admission comes first: while any open item is in an active state the
/// selector yields nothing, keeping processing serial. Entries that already
/// have an open item are skipped regardless of that item's state, and
/// entries sharing a grouping key with a `ManualIntervention` item are
/// excluded, on the rationale that siblings of a root-cause failure would
/// fail identically and burn budget. Among the survivors the pick is
/// deterministic: lowest domain weight, then manifest order.
pub fn select_next<'a>(
    backlog: &'a Backlog,
    open_items: &[WorkItem],
) -> Option<&'a SpecEntry> {
    if open_items.iter().any(|item| item.state.is_active()) {
        return None;
    }

    let blocked_groups: BTreeSet<&str> = open_items
        .iter()
        .filter(|item| item.state == ItemState::ManualIntervention)
        .map(|item| item.blocked_group())
        .collect();

    let in_flight: BTreeSet<&str> = open_items
        .iter()
        .map(|item| item.spec_id.as_str())
        .collect();

    backlog
        .entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !in_flight.contains(entry.id.as_str()))
        .filter(|(_, entry)| !blocked_groups.contains(blocked_group_of(&entry.id)))
        .min_by_key(|(position, entry)| (entry.domain.weight(), *position))
        .map(|(_, entry)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, domain: Domain) -> SpecEntry {
        SpecEntry {
            id: id.to_string(),
            title: format!("scenario for {id}"),
            given: "a table exists".to_string(),
            when: "the user acts".to_string(),
            then: "the expected outcome holds".to_string(),
            domain,
        }
    }

    fn backlog_of(entries: Vec<SpecEntry>) -> Backlog {
        Backlog { entries }
    }

    fn open_item(spec_id: &str, state: ItemState) -> WorkItem {
        let mut item = WorkItem::new(1, spec_id, 5, 30);
        item.state = state;
        item
    }

    // --- ordering ---

    #[test]
    fn picks_app_before_api() {
        let backlog = backlog_of(vec![
            entry("api.paths.tables.get", Domain::Api),
            entry("app.tables.create", Domain::App),
        ]);

        let picked = select_next(&backlog, &[]).unwrap();
        assert_eq!(picked.id, "app.tables.create");
    }

    #[test]
    fn preserves_manifest_order_within_a_domain() {
        let backlog = backlog_of(vec![
            entry("app.tables.create", Domain::App),
            entry("app.tables.checkbox.default", Domain::App),
        ]);

        let picked = select_next(&backlog, &[]).unwrap();
        assert_eq!(picked.id, "app.tables.create");
    }

    #[test]
    fn selection_is_deterministic() {
        let backlog = backlog_of(vec![
            entry("api.paths.tables.get", Domain::Api),
            entry("app.tables.row.add", Domain::App),
            entry("app.tables.create", Domain::App),
        ]);

        let first = select_next(&backlog, &[]).unwrap().id.clone();
        for _ in 0..5 {
            assert_eq!(select_next(&backlog, &[]).unwrap().id, first);
        }
    }

    // --- admission ---

    #[test]
    fn active_item_blocks_any_selection() {
        let backlog = backlog_of(vec![
            entry("app.tables.create", Domain::App),
            entry("app.tables.row.add", Domain::App),
        ]);

        for state in [
            ItemState::Created,
            ItemState::Verifying,
            ItemState::AwaitingRetry,
            ItemState::AgentRunning,
        ] {
            let open = vec![open_item("app.tables.create", state)];
            assert!(select_next(&backlog, &open).is_none());
        }
    }

    #[test]
    fn manual_intervention_does_not_hold_the_slot() {
        // A parked item lets the selector move on to the next entry.
        let backlog = backlog_of(vec![
            entry("app.tables.create", Domain::App),
            entry("api.paths.tables.get", Domain::Api),
        ]);
        let open = vec![open_item("app.tables.create", ItemState::ManualIntervention)];

        let picked = select_next(&backlog, &open).unwrap();
        assert_eq!(picked.id, "api.paths.tables.get");
    }

    #[test]
    fn entries_with_open_items_are_skipped() {
        let backlog = backlog_of(vec![
            entry("app.tables.create", Domain::App),
            entry("api.paths.tables.get", Domain::Api),
        ]);
        let open = vec![open_item("app.tables.create", ItemState::MergeConflict)];

        let picked = select_next(&backlog, &open).unwrap();
        assert_eq!(picked.id, "api.paths.tables.get");
    }

    // --- blocked groups ---

    #[test]
    fn manual_intervention_blocks_its_sibling_group() {
        let backlog = backlog_of(vec![
            entry("app.tables.checkbox.toggle", Domain::App),
            entry("app.tables.row.add", Domain::App),
        ]);
        let open = vec![open_item(
            "app.tables.checkbox.default",
            ItemState::ManualIntervention,
        )];

        // checkbox.* shares the failed group; row.* does not.
        let picked = select_next(&backlog, &open).unwrap();
        assert_eq!(picked.id, "app.tables.row.add");
    }

    #[test]
    fn closing_the_manual_item_unblocks_the_group() {
        let backlog = backlog_of(vec![entry("app.tables.checkbox.toggle", Domain::App)]);
        let open = vec![open_item(
            "app.tables.checkbox.default",
            ItemState::ManualIntervention,
        )];
        assert!(select_next(&backlog, &open).is_none());

        // Once the human closes the parked item it no longer appears in the
        // open list, and the group is selectable again.
        assert_eq!(
            select_next(&backlog, &[]).unwrap().id,
            "app.tables.checkbox.toggle"
        );
    }

    #[test]
    fn exhausted_backlog_selects_nothing() {
        let backlog = backlog_of(vec![entry("app.tables.create", Domain::App)]);
        let open = vec![open_item("app.tables.create", ItemState::ManualIntervention)];
        assert!(select_next(&backlog, &open).is_none());
    }

    // --- manifest loading ---

    #[test]
    fn load_parses_a_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        std::fs::write(
            &path,
            r#"{
                "entries": [
                    {
                        "id": "app.tables.create",
                        "title": "Create a table",
                        "given": "an empty base",
                        "when": "the user creates a table named Tasks",
                        "then": "the table list shows Tasks",
                        "domain": "app"
                    },
                    {
                        "id": "api.paths.tables.get",
                        "title": "List tables over the API",
                        "given": "a base with one table",
                        "when": "GET /tables is called",
                        "then": "the response lists exactly one table",
                        "domain": "api"
                    }
                ]
            }"#,
        )
        .unwrap();

        let backlog = Backlog::load(&path).unwrap();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.entries()[0].domain, Domain::App);
        assert!(backlog.find("api.paths.tables.get").is_some());
        assert!(backlog.find("api.paths.tables.delete").is_none());
    }

    #[test]
    fn load_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        std::fs::write(
            &path,
            r#"{
                "entries": [
                    {"id": "app.tables.create", "title": "a", "given": "g", "when": "w", "then": "t", "domain": "app"},
                    {"id": "app.tables.create", "title": "b", "given": "g", "when": "w", "then": "t", "domain": "app"}
                ]
            }"#,
        )
        .unwrap();

        let err = Backlog::load(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate spec id"));
    }

    #[test]
    fn load_rejects_an_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        std::fs::write(&path, r#"{"entries": []}"#).unwrap();
        assert!(Backlog::load(&path).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Backlog::load(Path::new("/nonexistent/backlog.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
