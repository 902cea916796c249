//! In-memory deletion adapter for tests
//!
//! [`FakeAdapter`] keeps a set of "existing" resources, so a second cleanup
//! pass sees only `NotFound`, and logs every call into a [`CallLog`] that can
//! be shared across adapters to check cross-kind ordering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reaper_common::{OwnershipMarker, ResourceKind};
use reaper_tracker::adapter::{DeleteOutcome, DeletionAdapter, Described, DiscoveredResource, ResourceState};
use reaper_tracker::error::AdapterError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Adapter operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Describe,
    /// Delete call started
    Delete,
    /// Delete call returned (whatever the result)
    DeleteFinished,
    List,
}

/// One adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: ResourceKind,
    /// Empty for `List`
    pub id: String,
    pub op: Op,
}

/// Shared, ordered log of adapter calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, kind: ResourceKind, id: &str, op: Op) {
        self.calls.lock().unwrap().push(Call {
            kind,
            id: id.to_string(),
            op,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Ids passed to `delete`, in call order (retries included)
    pub fn deletes(&self) -> Vec<String> {
        self.ids_for(Op::Delete)
    }

    pub fn ids_for(&self, op: Op) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .map(|c| c.id)
            .collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    /// Calls other than listing
    pub fn resource_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.op != Op::List).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[derive(Default)]
struct FakeState {
    existing: HashSet<String>,
    delete_script: HashMap<String, VecDeque<Result<DeleteOutcome, AdapterError>>>,
    state_script: HashMap<String, VecDeque<String>>,
}

/// Scripted deletion adapter for one kind
pub struct FakeAdapter {
    kind: ResourceKind,
    log: CallLog,
    state: Mutex<FakeState>,
    always_fail: HashMap<String, AdapterError>,
    deletable: HashSet<String>,
    delete_delay: HashMap<String, Duration>,
    listed: Vec<DiscoveredResource>,
    list_error: Option<AdapterError>,
}

impl FakeAdapter {
    /// Adapter that considers only "ACTIVE" deletable
    pub fn new(kind: ResourceKind, log: &CallLog) -> Self {
        Self {
            kind,
            log: log.clone(),
            state: Mutex::new(FakeState::default()),
            always_fail: HashMap::new(),
            deletable: HashSet::from(["ACTIVE".to_string()]),
            delete_delay: HashMap::new(),
            listed: Vec::new(),
            list_error: None,
        }
    }

    /// Resources that exist (in state "ACTIVE" unless scripted)
    pub fn with_resources<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .unwrap()
            .existing
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Every delete of `id` fails with `error`
    pub fn fail_delete(mut self, id: &str, error: AdapterError) -> Self {
        self.always_fail.insert(id.to_string(), error);
        self
    }

    /// Responses for the first deletes of `id`; afterwards normal behavior
    pub fn script_delete(self, id: &str, responses: Vec<Result<DeleteOutcome, AdapterError>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .delete_script
            .insert(id.to_string(), responses.into());
        self
    }

    /// States reported by successive describes of `id`; the last one repeats
    pub fn with_states(self, id: &str, states: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.existing.insert(id.to_string());
            state
                .state_script
                .insert(id.to_string(), states.iter().map(|s| s.to_string()).collect());
        }
        self
    }

    /// Each delete of `id` takes `delay` before returning
    pub fn with_delete_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delete_delay.insert(id.to_string(), delay);
        self
    }

    /// Resources returned by `list_owned` (they also start existing)
    pub fn with_listed(mut self, resources: Vec<DiscoveredResource>) -> Self {
        self.state
            .lock()
            .unwrap()
            .existing
            .extend(resources.iter().map(|r| r.id.clone()));
        self.listed = resources;
        self
    }

    pub fn fail_list(mut self, error: AdapterError) -> Self {
        self.list_error = Some(error);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.lock().unwrap().existing.contains(id)
    }

    fn respond_to_delete(&self, id: &str) -> Result<DeleteOutcome, AdapterError> {
        let mut state = self.state.lock().unwrap();
        if let Some(response) = state.delete_script.get_mut(id).and_then(VecDeque::pop_front) {
            if matches!(response, Ok(DeleteOutcome::Deleted)) {
                state.existing.remove(id);
            }
            return response;
        }
        if let Some(error) = self.always_fail.get(id) {
            return Err(error.clone());
        }
        if state.existing.remove(id) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}

#[async_trait]
impl DeletionAdapter for FakeAdapter {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn describe_state(&self, id: &str) -> Result<Described, AdapterError> {
        self.log.record(self.kind, id, Op::Describe);
        let mut state = self.state.lock().unwrap();
        if !state.existing.contains(id) {
            return Ok(Described::NotFound);
        }
        let current = match state.state_script.get_mut(id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        Ok(Described::State(ResourceState::new(
            current.unwrap_or_else(|| "ACTIVE".to_string()),
        )))
    }

    fn is_deletable(&self, state: &ResourceState) -> bool {
        self.deletable.contains(state.as_str())
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, AdapterError> {
        self.log.record(self.kind, id, Op::Delete);
        if let Some(delay) = self.delete_delay.get(id) {
            tokio::time::sleep(*delay).await;
        }
        let response = self.respond_to_delete(id);
        self.log.record(self.kind, id, Op::DeleteFinished);
        response
    }

    async fn list_owned(&self, _marker: &OwnershipMarker) -> Result<Vec<DiscoveredResource>, AdapterError> {
        self.log.record(self.kind, "", Op::List);
        if let Some(error) = &self.list_error {
            return Err(error.clone());
        }
        let state = self.state.lock().unwrap();
        Ok(self
            .listed
            .iter()
            .filter(|r| state.existing.contains(&r.id))
            .cloned()
            .collect())
    }
}

/// A resource tagged by the default owner, created `created_at`
pub fn tagged_resource(
    kind: ResourceKind,
    id: &str,
    session_id: &str,
    created_at: DateTime<Utc>,
) -> DiscoveredResource {
    DiscoveredResource {
        kind,
        id: id.to_string(),
        name: None,
        tags: OwnershipMarker::default().tags_for(session_id, created_at),
        created_at: Some(created_at),
    }
}
