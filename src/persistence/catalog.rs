//! In-memory catalog model shared by every store.
//!
//! All constraint checks live here, so [`MemoryStore`](super::MemoryStore) and
//! [`FileStore`](super::FileStore) cannot disagree on them.

use std::collections::BTreeMap;

use chrono::Utc;

use super::snapshot::{CatalogSnapshot, SCHEMA_VERSION};
use super::{Result, StoreError};
use crate::types::{
    FeatureId, FeatureRecord, NewFeature, NewPublication, PublicationId, PublicationRequest,
    PublicationStatus, ScenarioDraft, ScenarioId,
};

/// Records plus ID counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogState {
    features: BTreeMap<FeatureId, FeatureRecord>,
    publications: BTreeMap<PublicationId, PublicationRequest>,
    drafts: BTreeMap<ScenarioId, ScenarioDraft>,
    next_feature_id: u64,
    next_publication_id: u64,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self::from_snapshot(CatalogSnapshot::new())
    }
}

impl CatalogState {
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        CatalogState {
            features: snapshot.features.into_iter().map(|f| (f.id, f)).collect(),
            publications: snapshot.publications.into_iter().map(|p| (p.id, p)).collect(),
            drafts: snapshot
                .drafts
                .into_iter()
                .map(|d| (d.scenario_id.clone(), d))
                .collect(),
            next_feature_id: snapshot.next_feature_id,
            next_publication_id: snapshot.next_publication_id,
        }
    }

    pub fn to_snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            next_feature_id: self.next_feature_id,
            next_publication_id: self.next_publication_id,
            features: self.features.values().cloned().collect(),
            publications: self.publications.values().cloned().collect(),
            drafts: self.drafts.values().cloned().collect(),
        }
    }

    // ─── Features ───

    pub fn find_feature_by_path(&self, file_path: &str) -> Option<&FeatureRecord> {
        self.features.values().find(|f| f.file_path == file_path)
    }

    pub fn get_feature(&self, id: FeatureId) -> Option<&FeatureRecord> {
        self.features.get(&id)
    }

    pub fn create_feature(&mut self, feature: NewFeature) -> Result<FeatureRecord> {
        if self.find_feature_by_path(&feature.file_path).is_some() {
            return Err(StoreError::Conflict(format!(
                "feature already recorded for {}",
                feature.file_path
            )));
        }
        let id = FeatureId(self.next_feature_id);
        self.next_feature_id += 1;
        let record = feature.into_record(id);
        self.features.insert(id, record.clone());
        Ok(record)
    }

    pub fn update_feature(&mut self, record: &FeatureRecord) -> Result<()> {
        if let Some(other) = self.find_feature_by_path(&record.file_path)
            && other.id != record.id
        {
            return Err(StoreError::Conflict(format!(
                "{} already belongs to {}",
                record.file_path, other.id
            )));
        }
        match self.features.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.to_string())),
        }
    }

    pub fn list_feature_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.features.values().map(|f| f.file_path.clone()).collect();
        paths.sort();
        paths
    }

    // ─── Publications ───

    pub fn find_active_publication(
        &self,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Option<&PublicationRequest> {
        self.publications.values().find(|p| {
            !p.is_terminal() && &p.scenario_id == scenario_id && p.target_branch == target_branch
        })
    }

    pub fn get_publication(&self, id: PublicationId) -> Option<&PublicationRequest> {
        self.publications.get(&id)
    }

    pub fn create_publication(&mut self, new: NewPublication) -> Result<PublicationRequest> {
        if let Some(active) = self.find_active_publication(&new.scenario_id, &new.target_branch) {
            return Err(StoreError::Conflict(format!(
                "{} is still {} for {} -> {}",
                active.id, active.status, new.scenario_id, new.target_branch
            )));
        }
        let id = PublicationId(self.next_publication_id);
        self.next_publication_id += 1;
        let request = new.into_request(id);
        self.publications.insert(id, request.clone());
        Ok(request)
    }

    pub fn update_publication(&mut self, request: &PublicationRequest) -> Result<()> {
        if !request.is_terminal()
            && let Some(active) =
                self.find_active_publication(&request.scenario_id, &request.target_branch)
            && active.id != request.id
        {
            return Err(StoreError::Conflict(format!(
                "{} is already active for {} -> {}",
                active.id, request.scenario_id, request.target_branch
            )));
        }
        match self.publications.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(request.id.to_string())),
        }
    }

    pub fn list_publications_by_status(&self, status: &PublicationStatus) -> Vec<PublicationRequest> {
        self.publications
            .values()
            .filter(|p| p.status.name() == status.name())
            .cloned()
            .collect()
    }

    // ─── Drafts ───

    pub fn get_draft(&self, scenario_id: &ScenarioId) -> Option<&ScenarioDraft> {
        self.drafts.get(scenario_id)
    }

    pub fn save_draft(&mut self, draft: ScenarioDraft) {
        self.drafts.insert(draft.scenario_id.clone(), draft);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{BackendKind, ContentHash, FeatureType};

    fn new_feature(path: &str) -> NewFeature {
        NewFeature {
            file_path: path.to_string(),
            content_hash: ContentHash::of(path),
            feature_type: FeatureType::new("smoke"),
            name: "Login".to_string(),
            tags: Vec::new(),
            scenarios: Vec::new(),
        }
    }

    fn new_publication(scenario: &str, branch: &str) -> NewPublication {
        NewPublication {
            scenario_id: ScenarioId::new(scenario),
            target_branch: branch.to_string(),
            backend_kind: BackendKind::Stash,
            task_id: None,
        }
    }

    #[test]
    fn feature_paths_are_unique() {
        let mut state = CatalogState::default();
        let first = state.create_feature(new_feature("smoke/login.feature")).unwrap();
        assert_eq!(first.id, FeatureId(1));

        let err = state
            .create_feature(new_feature("smoke/login.feature"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let second = state.create_feature(new_feature("smoke/logout.feature")).unwrap();
        assert_eq!(second.id, FeatureId(2));
        assert_eq!(
            state.list_feature_paths(),
            vec!["smoke/login.feature", "smoke/logout.feature"]
        );
    }

    #[test]
    fn update_unknown_feature_is_not_found() {
        let mut state = CatalogState::default();
        let record = new_feature("a.feature").into_record(FeatureId(99));
        assert!(matches!(
            state.update_feature(&record),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn one_active_publication_per_pair() {
        let mut state = CatalogState::default();
        let mut first = state.create_publication(new_publication("S1", "main")).unwrap();

        let err = state
            .create_publication(new_publication("S1", "main"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Other branch or other scenario is fine.
        state.create_publication(new_publication("S1", "release")).unwrap();
        state.create_publication(new_publication("S2", "main")).unwrap();

        // Once terminal, a new request may be created.
        first.fail(ErrorKind::AuthRequestRejected, "403").unwrap();
        state.update_publication(&first).unwrap();
        let again = state.create_publication(new_publication("S1", "main")).unwrap();
        assert_ne!(again.id, first.id);
    }

    #[test]
    fn list_by_status_matches_variant() {
        let mut state = CatalogState::default();
        let mut a = state.create_publication(new_publication("S1", "main")).unwrap();
        state.create_publication(new_publication("S2", "main")).unwrap();
        a.fail(ErrorKind::TransientInfra, "x").unwrap();
        state.update_publication(&a).unwrap();

        let failed = state.list_publications_by_status(&PublicationStatus::Failed {
            kind: ErrorKind::InvalidTask,
            message: String::new(),
        });
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, a.id);
        assert_eq!(
            state
                .list_publications_by_status(&PublicationStatus::Pending)
                .len(),
            1
        );
    }

    #[test]
    fn snapshot_round_trip_keeps_counters() {
        let mut state = CatalogState::default();
        state.create_feature(new_feature("a.feature")).unwrap();
        state.create_publication(new_publication("S1", "main")).unwrap();

        let mut restored = CatalogState::from_snapshot(state.to_snapshot());
        assert_eq!(restored, state);
        let next = restored.create_feature(new_feature("b.feature")).unwrap();
        assert_eq!(next.id, FeatureId(2));
    }
}
