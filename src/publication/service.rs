//! Producer side of publication: turns an operator's request into a task.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::persistence::PublicationStore;
use crate::queue::{Stream, StreamKind, TaskProducer};
use crate::types::{ScenarioId, TaskId, TaskPayload};

use super::error::{PublishError, Result};

pub struct PublicationService<P, St> {
    producer: Arc<P>,
    store: Arc<St>,
    stream: Stream,
}

impl<P, St> PublicationService<P, St>
where
    P: TaskProducer + Send + Sync,
    St: PublicationStore,
{
    pub fn new(producer: Arc<P>, store: Arc<St>) -> Self {
        PublicationService {
            producer,
            store,
            stream: Stream::for_kind(StreamKind::Publication),
        }
    }

    /// Enqueues a publish task for the pair.
    ///
    /// Refuses with `AlreadyPublished` while a non-terminal request exists for
    /// it. The store constraint still guards the race between this check and
    /// the worker creating the request.
    #[instrument(skip(self, scenario_id), fields(scenario_id = %scenario_id))]
    pub async fn request_publication(
        &self,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Result<TaskId> {
        if let Some(active) = self
            .store
            .find_active_publication(scenario_id, target_branch)?
        {
            return Err(PublishError::AlreadyPublished {
                scenario_id: scenario_id.clone(),
                target_branch: target_branch.to_string(),
                existing: active.id,
            });
        }

        let payload = TaskPayload::PublishFeature {
            scenario_id: scenario_id.clone(),
            target_branch: target_branch.to_string(),
        };
        let task_id = self.producer.enqueue(&self.stream, payload).await?;
        info!(task_id = %task_id, "Publication requested");
        Ok(task_id)
    }
}
