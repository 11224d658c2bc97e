use super::{AggregateObject, ChangeAction, ChangeEvent, ObjectStore, StoreError};
use crate::pipeline::{AggregateStatus, Pipeline, PipelineKind, PipelineStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type ObjectKey = (PipelineKind, String);

/// In-process store used by the standalone runtime and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Pipeline>,
    aggregate: AggregateObject,
    last_version: u64,
    watchers: BTreeMap<PipelineKind, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    faults: Faults,
    status_writes: u64,
}

#[derive(Debug, Default)]
struct Faults {
    status_conflicts: u32,
    unavailable_lists: u32,
}

impl MemoryState {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn notify(&mut self, kind: PipelineKind, name: &str, action: ChangeAction) {
        if let Some(senders) = self.watchers.get_mut(&kind) {
            let event = ChangeEvent {
                kind,
                name: name.to_string(),
                action,
            };
            senders.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }

    fn existing(&self, kind: PipelineKind, name: &str) -> Result<&Pipeline, StoreError> {
        self.objects
            .get(&(kind, name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: name.to_string(),
            })
    }
}

fn check_version(object: String, expected: u64, actual: u64) -> Result<(), StoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            object,
            expected,
            actual,
        })
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Current copy of an object, bypassing fault injection.
    pub fn snapshot(&self, kind: PipelineKind, name: &str) -> Option<Pipeline> {
        self.lock().objects.get(&(kind, name.to_string())).cloned()
    }

    pub fn aggregate_snapshot(&self) -> AggregateObject {
        self.lock().aggregate.clone()
    }

    /// Number of successful pipeline status writes so far.
    pub fn status_writes(&self) -> u64 {
        self.lock().status_writes
    }

    /// The next `count` status writes fail with a conflict after bumping the
    /// stored version, as if another writer got there first.
    pub fn inject_status_conflicts(&self, count: u32) {
        self.lock().faults.status_conflicts = count;
    }

    /// The next `count` list calls fail as unavailable.
    pub fn inject_unavailable_lists(&self, count: u32) {
        self.lock().faults.unavailable_lists = count;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, kind: PipelineKind) -> Result<Vec<Pipeline>, StoreError> {
        let mut state = self.lock();
        if state.faults.unavailable_lists > 0 {
            state.faults.unavailable_lists -= 1;
            return Err(StoreError::Unavailable(format!("listing {kind} pipelines")));
        }
        Ok(state
            .objects
            .iter()
            .filter(|((object_kind, _), _)| *object_kind == kind)
            .map(|(_, pipeline)| pipeline.clone())
            .collect())
    }

    async fn get(&self, kind: PipelineKind, name: &str) -> Result<Pipeline, StoreError> {
        self.lock().existing(kind, name).cloned()
    }

    async fn create(&self, mut pipeline: Pipeline) -> Result<Pipeline, StoreError> {
        if pipeline.name().is_empty() {
            return Err(StoreError::Invalid("metadata.name is required".to_string()));
        }
        let mut state = self.lock();
        let kind = pipeline.kind();
        let key = (kind, pipeline.name().to_string());
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind, name: key.1 });
        }

        pipeline.metadata.resource_version = state.next_version();
        pipeline.metadata.generation = pipeline.metadata.generation.max(1);
        pipeline.metadata.deletion_timestamp = None;
        if pipeline.metadata.creation_timestamp.is_none() {
            pipeline.metadata.creation_timestamp = Some(Utc::now());
        }
        state.objects.insert(key.clone(), pipeline.clone());
        state.notify(kind, &key.1, ChangeAction::Created);
        Ok(pipeline)
    }

    async fn update(&self, mut pipeline: Pipeline) -> Result<Pipeline, StoreError> {
        let mut state = self.lock();
        let kind = pipeline.kind();
        let name = pipeline.name().to_string();
        let existing = state.existing(kind, &name)?.clone();
        check_version(
            format!("{kind}/{name}"),
            pipeline.metadata.resource_version,
            existing.metadata.resource_version,
        )?;

        let spec_changed = existing.spec != pipeline.spec;
        pipeline.status = existing.status;
        pipeline.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        pipeline.metadata.deletion_timestamp = existing.metadata.deletion_timestamp;
        pipeline.metadata.generation = if spec_changed {
            existing.metadata.generation + 1
        } else {
            existing.metadata.generation
        };
        pipeline.metadata.resource_version = state.next_version();

        let key = (kind, name);
        if pipeline.is_being_deleted() && pipeline.metadata.finalizers.is_empty() {
            state.objects.remove(&key);
            state.notify(kind, &key.1, ChangeAction::Deleted);
            return Ok(pipeline);
        }

        state.objects.insert(key.clone(), pipeline.clone());
        if spec_changed {
            state.notify(kind, &key.1, ChangeAction::Updated);
        }
        Ok(pipeline)
    }

    async fn update_status(
        &self,
        kind: PipelineKind,
        name: &str,
        resource_version: u64,
        status: PipelineStatus,
    ) -> Result<Pipeline, StoreError> {
        let mut state = self.lock();
        let current = state.existing(kind, name)?.metadata.resource_version;
        if state.faults.status_conflicts > 0 {
            state.faults.status_conflicts -= 1;
            let bumped = state.next_version();
            if let Some(object) = state.objects.get_mut(&(kind, name.to_string())) {
                object.metadata.resource_version = bumped;
            }
            return Err(StoreError::Conflict {
                object: format!("{kind}/{name}"),
                expected: resource_version,
                actual: bumped,
            });
        }
        check_version(format!("{kind}/{name}"), resource_version, current)?;

        let version = state.next_version();
        state.status_writes += 1;
        let object = state
            .objects
            .get_mut(&(kind, name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: name.to_string(),
            })?;
        object.status = status;
        object.metadata.resource_version = version;
        Ok(object.clone())
    }

    async fn delete(&self, kind: PipelineKind, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let existing = state.existing(kind, name)?;
        let key = (kind, name.to_string());

        if existing.metadata.finalizers.is_empty() {
            state.objects.remove(&key);
            state.notify(kind, name, ChangeAction::Deleted);
            return Ok(());
        }
        if existing.is_being_deleted() {
            return Ok(());
        }

        let version = state.next_version();
        if let Some(object) = state.objects.get_mut(&key) {
            object.metadata.deletion_timestamp = Some(Utc::now());
            object.metadata.resource_version = version;
        }
        state.notify(kind, name, ChangeAction::Updated);
        Ok(())
    }

    async fn get_aggregate(&self) -> Result<AggregateObject, StoreError> {
        Ok(self.lock().aggregate.clone())
    }

    async fn update_aggregate_status(
        &self,
        resource_version: u64,
        status: AggregateStatus,
    ) -> Result<AggregateObject, StoreError> {
        let mut state = self.lock();
        check_version(
            "telemetry/default".to_string(),
            resource_version,
            state.aggregate.resource_version,
        )?;
        let version = state.next_version();
        state.aggregate = AggregateObject {
            resource_version: version,
            status,
        };
        Ok(state.aggregate.clone())
    }

    fn watch(&self, kind: PipelineKind) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().watchers.entry(kind).or_default().push(sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        ObjectMeta, OtlpOutput, PipelineOutput, PipelineSpec, TracePipelineSpec,
        PIPELINE_FINALIZER,
    };

    fn trace(name: &str, endpoint: &str) -> Pipeline {
        Pipeline::new(
            ObjectMeta::named(name),
            PipelineSpec::Trace(TracePipelineSpec {
                output: Some(PipelineOutput::otlp(OtlpOutput::grpc(endpoint))),
            }),
        )
    }

    #[tokio::test]
    async fn only_spec_changes_emit_update_events() {
        let store = MemoryObjectStore::new();
        let mut events = store.watch(PipelineKind::Traces);

        let mut created = store.create(trace("a", "http://a:4317")).await.expect("create");
        assert_eq!(events.try_recv().expect("event").action, ChangeAction::Created);

        created.metadata.add_finalizer(PIPELINE_FINALIZER);
        let updated = store.update(created).await.expect("finalizer update");
        assert!(events.try_recv().is_err());
        assert_eq!(updated.metadata.generation, 1);

        store
            .update_status(
                PipelineKind::Traces,
                "a",
                updated.metadata.resource_version,
                PipelineStatus::default(),
            )
            .await
            .expect("status");
        assert!(events.try_recv().is_err());

        let mut changed = store.get(PipelineKind::Traces, "a").await.expect("get");
        changed.spec = trace("a", "http://b:4317").spec;
        let changed = store.update(changed).await.expect("spec update");
        assert_eq!(changed.metadata.generation, 2);
        assert_eq!(events.try_recv().expect("event").action, ChangeAction::Updated);
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = MemoryObjectStore::new();
        let created = store.create(trace("a", "http://a:4317")).await.expect("create");
        store
            .update_status(
                PipelineKind::Traces,
                "a",
                created.metadata.resource_version,
                PipelineStatus::default(),
            )
            .await
            .expect("first write");
        let err = store
            .update_status(
                PipelineKind::Traces,
                "a",
                created.metadata.resource_version,
                PipelineStatus::default(),
            )
            .await
            .expect_err("stale write");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn finalizer_holds_deletion_until_removed() {
        let store = MemoryObjectStore::new();
        let mut pipeline = trace("a", "http://a:4317");
        pipeline.metadata.add_finalizer(PIPELINE_FINALIZER);
        store.create(pipeline).await.expect("create");
        let mut events = store.watch(PipelineKind::Traces);

        store.delete(PipelineKind::Traces, "a").await.expect("delete");
        let deleting = store.snapshot(PipelineKind::Traces, "a").expect("still present");
        assert!(deleting.is_being_deleted());
        assert_eq!(events.try_recv().expect("event").action, ChangeAction::Updated);

        let mut released = deleting;
        released.metadata.remove_finalizer(PIPELINE_FINALIZER);
        store.update(released).await.expect("release");
        assert!(store.snapshot(PipelineKind::Traces, "a").is_none());
        assert_eq!(events.try_recv().expect("event").action, ChangeAction::Deleted);
    }
}
