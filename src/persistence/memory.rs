//! Process-local store.

use std::sync::{Mutex, MutexGuard};

use super::{
    CatalogState, FeatureCatalog, PublicationStore, Result, ScenarioDrafts,
};
use crate::types::{
    FeatureId, FeatureRecord, NewFeature, NewPublication, PublicationId, PublicationRequest,
    PublicationStatus, ScenarioDraft, ScenarioId,
};

/// Mutex-guarded [`CatalogState`] implementing every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<CatalogState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        // A panic while holding the lock cannot leave the state half-updated:
        // every mutation is a single insert after its checks.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FeatureCatalog for MemoryStore {
    fn find_feature_by_path(&self, file_path: &str) -> Result<Option<FeatureRecord>> {
        Ok(self.lock().find_feature_by_path(file_path).cloned())
    }

    fn create_feature(&self, feature: NewFeature) -> Result<FeatureRecord> {
        self.lock().create_feature(feature)
    }

    fn update_feature(&self, record: &FeatureRecord) -> Result<()> {
        self.lock().update_feature(record)
    }

    fn get_feature(&self, id: FeatureId) -> Result<Option<FeatureRecord>> {
        Ok(self.lock().get_feature(id).cloned())
    }

    fn list_feature_paths(&self) -> Result<Vec<String>> {
        Ok(self.lock().list_feature_paths())
    }
}

impl PublicationStore for MemoryStore {
    fn create_publication(&self, new: NewPublication) -> Result<PublicationRequest> {
        self.lock().create_publication(new)
    }

    fn update_publication(&self, request: &PublicationRequest) -> Result<()> {
        self.lock().update_publication(request)
    }

    fn get_publication(&self, id: PublicationId) -> Result<Option<PublicationRequest>> {
        Ok(self.lock().get_publication(id).cloned())
    }

    fn find_active_publication(
        &self,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Result<Option<PublicationRequest>> {
        Ok(self
            .lock()
            .find_active_publication(scenario_id, target_branch)
            .cloned())
    }

    fn list_publications_by_status(
        &self,
        status: &PublicationStatus,
    ) -> Result<Vec<PublicationRequest>> {
        Ok(self.lock().list_publications_by_status(status))
    }
}

impl ScenarioDrafts for MemoryStore {
    fn get_draft(&self, scenario_id: &ScenarioId) -> Result<Option<ScenarioDraft>> {
        Ok(self.lock().get_draft(scenario_id).cloned())
    }

    fn save_draft(&self, draft: ScenarioDraft) -> Result<()> {
        self.lock().save_draft(draft);
        Ok(())
    }
}
