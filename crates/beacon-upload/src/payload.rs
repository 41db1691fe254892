//! Session envelope assembly

use std::collections::BTreeMap;

use beacon_core::domain::{ResourceKey, SessionRecord};
use beacon_core::ports::{SessionInfoPayload, SessionPayload};
use beacon_storage::{LogFilter, SpanFilter, StoreHandle, TelemetryStore};

use crate::Result;

/// Builds [`SessionPayload`]s from persisted data
///
/// Reads go to the store's reader pool. The upload counter is incremented
/// through the write queue.
#[derive(Debug, Clone)]
pub struct SessionPayloadBuilder {
    store: TelemetryStore,
    writer: StoreHandle,
}

impl SessionPayloadBuilder {
    pub fn new(store: TelemetryStore, writer: StoreHandle) -> Self {
        Self { store, writer }
    }

    /// Assembles the envelope of `session`
    ///
    /// Every call takes the next value of the permanent
    /// `session.upload_index` counter. Resources of the session scope
    /// shadow process ones, which shadow permanent ones.
    pub async fn build(&self, session: &SessionRecord) -> Result<SessionPayload> {
        let counter = self
            .writer
            .increment_permanent_counter(ResourceKey::SessionUploadIndex)
            .await?;

        let mut resources = BTreeMap::new();
        for resource in self.store.fetch_all_resources_for_session(&session.id).await? {
            // Rows arrive ordered permanent, process, session within a key
            resources.insert(resource.key.as_str().to_string(), resource.value);
        }

        let spans = self
            .store
            .fetch_spans(&SpanFilter::new().with_session_id(session.id.clone()))
            .await?;
        let logs = self
            .store
            .fetch_logs(&LogFilter::new().with_session_id(session.id.clone()))
            .await?;

        tracing::debug!(
            session_id = %session.id,
            counter,
            spans = spans.len(),
            logs = logs.len(),
            "Built session payload"
        );

        Ok(SessionPayload {
            session: SessionInfoPayload::new(session, counter),
            resources,
            spans,
            logs,
        })
    }
}
