use crate::normalize::{is_placeholder_id, match_key, StaffDraft};
use serde_json::Value;
use std::collections::HashMap;

/// A record's organizational unit: a resolved reference into the unit
/// directory, or legacy free text that matched nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitRef {
    Resolved { id: String, name: String },
    Unresolved(String),
}

impl UnitRef {
    pub fn name(&self) -> &str {
        match self {
            UnitRef::Resolved { name, .. } => name,
            UnitRef::Unresolved(name) => name,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            UnitRef::Resolved { id, .. } => Some(id),
            UnitRef::Unresolved(_) => None,
        }
    }

    /// Matching/ownership key. The effective unit for access control is
    /// always the resolved name, never the raw id.
    pub fn key(&self) -> String {
        match_key(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct UnitRow {
    pub id: String,
    pub name: String,
    pub external_code: Option<String>,
}

/// Snapshot of the `units` table keyed for name lookup. The single place
/// where a declared unit name becomes a `UnitRef`.
pub struct UnitDirectory {
    by_key: HashMap<String, UnitRow>,
}

impl UnitDirectory {
    pub fn new(units: Vec<UnitRow>) -> Self {
        let mut by_key = HashMap::new();
        for u in units {
            by_key.insert(match_key(&u.name), u);
        }
        UnitDirectory { by_key }
    }

    pub fn resolve(&self, name: &str) -> UnitRef {
        match self.by_key.get(&match_key(name)) {
            Some(u) => UnitRef::Resolved {
                id: u.id.clone(),
                name: u.name.clone(),
            },
            None => UnitRef::Unresolved(name.trim().to_string()),
        }
    }
}

/// One staff row as stored, hydrated for matching.
#[derive(Debug, Clone)]
pub struct StoredStaff {
    pub id: String,
    pub external_id: String,
    pub name: String,
    pub unit: Option<UnitRef>,
    pub attributes: Value,
    pub is_active: bool,
    pub is_generated: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredStaff {
    pub fn name_key(&self) -> String {
        match_key(&self.name)
    }

    pub fn unit_key(&self) -> String {
        self.unit.as_ref().map(|u| u.key()).unwrap_or_default()
    }

    pub fn certified(&self) -> bool {
        self.attributes
            .get("certified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Per-batch snapshot of the whole store. Loaded once per batch and kept
/// current after every write so later rows match records written earlier in
/// the same batch. Inactive records participate so re-imports revive instead
/// of duplicating.
pub struct MatchIndex {
    records: HashMap<String, StoredStaff>,
    by_external: HashMap<String, String>,
    by_name_unit: HashMap<(String, String), String>,
}

impl MatchIndex {
    /// `rows` must arrive oldest-update-first: on an external-id collision
    /// the most recently updated record wins the index slot.
    pub fn build(rows: Vec<StoredStaff>) -> Self {
        let mut index = MatchIndex {
            records: HashMap::new(),
            by_external: HashMap::new(),
            by_name_unit: HashMap::new(),
        };
        for row in rows {
            index.insert_entries(row);
        }
        index
    }

    fn insert_entries(&mut self, row: StoredStaff) {
        if !is_placeholder_id(&row.external_id) {
            self.by_external
                .insert(row.external_id.clone(), row.id.clone());
        }
        self.by_name_unit
            .insert((row.name_key(), row.unit_key()), row.id.clone());
        self.records.insert(row.id.clone(), row);
    }

    fn remove_entries(&mut self, id: &str) {
        let Some(old) = self.records.remove(id) else {
            return;
        };
        if self.by_external.get(&old.external_id).map(String::as_str) == Some(id) {
            self.by_external.remove(&old.external_id);
        }
        let key = (old.name_key(), old.unit_key());
        if self.by_name_unit.get(&key).map(String::as_str) == Some(id) {
            self.by_name_unit.remove(&key);
        }
    }

    pub fn get(&self, id: &str) -> Option<&StoredStaff> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &StoredStaff> {
        self.records.values()
    }

    /// Resolution order: exact external id (real ids only, both sides), then
    /// fuzzy (name key, effective-unit key).
    pub fn resolve(&self, draft: &StaffDraft, unit_key: &str) -> Option<&StoredStaff> {
        if !is_placeholder_id(&draft.external_id) {
            if let Some(id) = self.by_external.get(&draft.external_id) {
                return self.records.get(id);
            }
        }
        let key = (match_key(&draft.name), unit_key.to_string());
        self.by_name_unit
            .get(&key)
            .and_then(|id| self.records.get(id))
    }

    /// Record a write. Stale pointers from the record's previous name, unit
    /// or external id are dropped before the fresh entries go in.
    pub fn note_written(&mut self, record: StoredStaff) {
        self.remove_entries(&record.id);
        self.insert_entries(record);
    }

    pub fn note_deleted(&mut self, id: &str) {
        self.remove_entries(id);
    }
}

/// Survivor selection for a duplicate group: a real external id beats a
/// placeholder, then certification, then latest update, then latest creation,
/// then lowest id for determinism.
pub fn pick_survivor(group: &[StoredStaff]) -> (&StoredStaff, &'static str) {
    let survivor = group
        .iter()
        .max_by(|a, b| {
            let ka = (
                !is_placeholder_id(&a.external_id),
                a.certified(),
                a.updated_at,
                a.created_at,
            );
            let kb = (
                !is_placeholder_id(&b.external_id),
                b.certified(),
                b.updated_at,
                b.created_at,
            );
            ka.cmp(&kb).then_with(|| b.id.cmp(&a.id))
        })
        .unwrap_or(&group[0]);

    let reason = if !is_placeholder_id(&survivor.external_id)
        && group
            .iter()
            .any(|r| r.id != survivor.id && is_placeholder_id(&r.external_id))
    {
        "real external id"
    } else if survivor.certified() && group.iter().any(|r| r.id != survivor.id && !r.certified()) {
        "certified"
    } else if group
        .iter()
        .any(|r| r.id != survivor.id && r.updated_at < survivor.updated_at)
    {
        "most recently updated"
    } else {
        "stable order"
    };

    (survivor, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn staff(id: &str, external_id: &str, name: &str, unit: &str) -> StoredStaff {
        StoredStaff {
            id: id.to_string(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            unit: Some(UnitRef::Unresolved(unit.to_string())),
            attributes: json!({}),
            is_active: true,
            is_generated: false,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    fn draft(external_id: &str, name: &str) -> StaffDraft {
        StaffDraft {
            external_id: external_id.to_string(),
            name: name.to_string(),
            declared_unit: None,
            attributes: Default::default(),
        }
    }

    #[test]
    fn unit_directory_resolves_by_normalized_name() {
        let dir = UnitDirectory::new(vec![UnitRow {
            id: "u-1".to_string(),
            name: "SDN 3 Cibadak".to_string(),
            external_code: None,
        }]);
        match dir.resolve("sdn 3 CIBADAK") {
            UnitRef::Resolved { id, name } => {
                assert_eq!(id, "u-1");
                assert_eq!(name, "SDN 3 Cibadak");
            }
            other => panic!("expected resolved unit, got {:?}", other),
        }
        assert_eq!(
            dir.resolve("Unknown Place"),
            UnitRef::Unresolved("Unknown Place".to_string())
        );
    }

    #[test]
    fn external_id_match_beats_name() {
        let index = MatchIndex::build(vec![
            staff("a", "K-1", "Ahmad", "sdn1"),
            staff("b", "K-2", "Ahmad Renamed", "sdn1"),
        ]);
        let m = index.resolve(&draft("K-2", "Ahmad"), "sdn1").unwrap();
        assert_eq!(m.id, "b");
    }

    #[test]
    fn placeholder_ids_never_match_exactly() {
        let index = MatchIndex::build(vec![staff("a", "TMP-1-0", "Ahmad", "sdn1")]);
        // Same placeholder on the draft side must not hit the external index.
        let m = index.resolve(&draft("TMP-1-0", "Someone Else"), "other");
        assert!(m.is_none());
        // It still matches by name within the unit.
        let m = index.resolve(&draft("TMP-9-9", "AHMAD"), "sdn1").unwrap();
        assert_eq!(m.id, "a");
    }

    #[test]
    fn fuzzy_match_requires_same_unit() {
        let index = MatchIndex::build(vec![staff("a", "TMP-1-0", "Ahmad", "sdn1")]);
        assert!(index.resolve(&draft("TMP-2-0", "Ahmad"), "sdn2").is_none());
        assert!(index.resolve(&draft("TMP-2-0", "Ahmad"), "sdn1").is_some());
    }

    #[test]
    fn newest_update_wins_external_collision() {
        let mut older = staff("a", "K-1", "Ahmad", "sdn1");
        older.updated_at = 1_000;
        let mut newer = staff("b", "K-1", "Ahmad F", "sdn2");
        newer.updated_at = 2_000;
        // Build order is oldest-first, as the batch loader guarantees.
        let index = MatchIndex::build(vec![older, newer]);
        let m = index.resolve(&draft("K-1", "whoever"), "x").unwrap();
        assert_eq!(m.id, "b");
    }

    #[test]
    fn note_written_updates_all_pointers() {
        let mut index = MatchIndex::build(vec![staff("a", "TMP-1-0", "Ahmad", "sdn1")]);
        let mut upgraded = staff("a", "K-9", "Ahmad Fauzi", "sdn1");
        upgraded.updated_at = 5_000;
        index.note_written(upgraded);

        // New external id now matches exactly.
        assert_eq!(index.resolve(&draft("K-9", "x"), "").unwrap().id, "a");
        // Old name key no longer points anywhere.
        assert!(index.resolve(&draft("TMP-2-2", "Ahmad"), "sdn1").is_none());
        // New name key matches.
        assert_eq!(
            index.resolve(&draft("TMP-2-2", "ahmad fauzi"), "sdn1").unwrap().id,
            "a"
        );
    }

    #[test]
    fn survivor_prefers_real_external_id() {
        let real = staff("b", "K-1999-001", "Ahmad", "sdn1");
        let mut placeholder = staff("a", "TMP-1-0", "Ahmad", "sdn1");
        placeholder.updated_at = 9_999;
        let group = vec![placeholder, real];
        let (s, reason) = pick_survivor(&group);
        assert_eq!(s.id, "b");
        assert_eq!(reason, "real external id");
    }

    #[test]
    fn survivor_prefers_certified_then_recency() {
        let mut plain = staff("a", "TMP-1-0", "Ahmad", "sdn1");
        plain.updated_at = 9_999;
        let mut certified = staff("b", "TMP-1-1", "Ahmad", "sdn1");
        certified.attributes = json!({ "certified": true });
        let group = vec![plain.clone(), certified];
        let (s, reason) = pick_survivor(&group);
        assert_eq!(s.id, "b");
        assert_eq!(reason, "certified");

        let mut newer = staff("c", "TMP-1-2", "Ahmad", "sdn1");
        newer.updated_at = 10_000;
        let group = vec![plain, newer];
        let (s, reason) = pick_survivor(&group);
        assert_eq!(s.id, "c");
        assert_eq!(reason, "most recently updated");
    }

    #[test]
    fn survivor_tie_breaks_on_lowest_id() {
        let group = vec![
            staff("b", "TMP-1-0", "Ahmad", "sdn1"),
            staff("a", "TMP-1-1", "Ahmad", "sdn1"),
        ];
        let (s, reason) = pick_survivor(&group);
        assert_eq!(s.id, "a");
        assert_eq!(reason, "stable order");
    }
}
