/// Entity-level metadata operations
///
/// Combines the object store with the identifier generators: flows and steps are
/// created idempotently, runs and tasks always get a fresh identifier, parents are
/// created implicitly, and artifacts / metadata entries are appended per task.

use crate::store::{
    error::{StoreError, StoreResult},
    ids::{LogicalClock, TaskIdAllocator},
    storage::{validate_record_part, ObjectKey, ObjectStore, SELF_RECORD},
    types::{
        Artifact, FlowRecord, MetadataEntry, ObjectBody, RunRecord, StepRecord, TagMutation,
        TaskRecord,
    },
};
use parking_lot::Mutex;
use regex::Regex;
use std::path::Path;

const ARTIFACT_MARKER: &str = "_artifact_";
const METADATA_PREFIX: &str = "sysmeta_";

/// Metadata store over one datastore directory
///
/// Holds no entity state in memory: every call reads from and writes to disk. The
/// only in-memory state is the identifier generators and the tag-mutation lock.
#[derive(Debug)]
pub struct MetadataStore {
    objects: ObjectStore,
    run_ids: LogicalClock,
    registration_clock: LogicalClock,
    task_ids: TaskIdAllocator,
    tag_lock: Mutex<()>,
}

impl MetadataStore {
    /// Open the datastore under `root`, creating `<root>/.metaflow` if missing
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self {
            objects: ObjectStore::open(root)?,
            run_ids: LogicalClock::micros(),
            registration_clock: LogicalClock::millis(),
            task_ids: TaskIdAllocator::new(),
            tag_lock: Mutex::new(()),
        })
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Issue a new run ID (decimal microseconds, strictly increasing)
    pub fn new_run_id(&self) -> String {
        self.run_ids.tick().to_string()
    }

    // Flows

    pub fn get_or_create_flow(&self, flow: &str, body: ObjectBody) -> StoreResult<(FlowRecord, bool)> {
        let key = ObjectKey::new(&[flow])?;
        let (record, created) = self.objects.get_or_create(&key, || FlowRecord {
            flow_id: flow.to_string(),
            meta: body.into_meta(),
        })?;
        if created {
            tracing::info!("Created flow {}", flow);
        }
        Ok((record, created))
    }

    pub fn get_flow(&self, flow: &str) -> StoreResult<Option<FlowRecord>> {
        let key = ObjectKey::new(&[flow])?;
        Ok(self.objects.read(&key, SELF_RECORD))
    }

    // Runs

    /// Create a run with a freshly issued ID; the flow is created if absent
    pub fn create_run(&self, flow: &str, body: ObjectBody) -> StoreResult<RunRecord> {
        self.get_or_create_flow(flow, body.clone())?;
        let run_id = self.new_run_id();
        let key = ObjectKey::new(&[flow, run_id.as_str()])?;
        let record = RunRecord {
            flow_id: flow.to_string(),
            run_number: run_id,
            meta: body.into_meta(),
        };
        self.objects.write(&key, SELF_RECORD, &record)?;
        tracing::info!("Created run {}/{}", flow, record.run_number);
        Ok(record)
    }

    pub fn get_run(&self, flow: &str, run: &str) -> StoreResult<Option<RunRecord>> {
        let key = ObjectKey::new(&[flow, run])?;
        Ok(self.objects.read(&key, SELF_RECORD))
    }

    pub fn list_runs(&self, flow: &str) -> StoreResult<Vec<RunRecord>> {
        let key = ObjectKey::new(&[flow])?;
        Ok(self.objects.list_child_records(&key))
    }

    // Steps

    /// Return the step, creating it (and its flow and run records) when absent
    pub fn get_or_create_step(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        body: ObjectBody,
    ) -> StoreResult<(StepRecord, bool)> {
        let key = ObjectKey::new(&[flow, run, step])?;
        if let Some(existing) = self.objects.read(&key, SELF_RECORD) {
            return Ok((existing, false));
        }

        self.get_or_create_flow(flow, body.clone())?;
        let run_key = ObjectKey::new(&[flow, run])?;
        self.objects.get_or_create(&run_key, || RunRecord {
            flow_id: flow.to_string(),
            run_number: run.to_string(),
            meta: body.clone().into_meta(),
        })?;

        let (record, created) = self.objects.get_or_create(&key, || StepRecord {
            flow_id: flow.to_string(),
            run_number: run.to_string(),
            step_name: step.to_string(),
            meta: body.into_meta(),
        })?;
        if created {
            tracing::info!("Created step {}/{}/{}", flow, run, step);
        }
        Ok((record, created))
    }

    pub fn get_step(&self, flow: &str, run: &str, step: &str) -> StoreResult<Option<StepRecord>> {
        let key = ObjectKey::new(&[flow, run, step])?;
        Ok(self.objects.read(&key, SELF_RECORD))
    }

    pub fn list_steps(&self, flow: &str, run: &str) -> StoreResult<Vec<StepRecord>> {
        let key = ObjectKey::new(&[flow, run])?;
        Ok(self.objects.list_child_records(&key))
    }

    // Tasks

    /// Create a task with the next ID of its run; the step is created if absent
    pub fn create_task(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        body: ObjectBody,
    ) -> StoreResult<TaskRecord> {
        self.get_or_create_step(flow, run, step, body.clone())?;
        let run_key = ObjectKey::new(&[flow, run])?;
        let task_id = self
            .task_ids
            .next_id(flow, run, || self.max_task_id_on_disk(&run_key))
            .to_string();

        let key = run_key.child(step)?.child(&task_id)?;
        // The directory claims the ID before the record lands, so a crash in
        // between still moves the seed past it on the next start.
        self.objects.ensure_object(&key)?;
        let record = TaskRecord {
            flow_id: flow.to_string(),
            run_number: run.to_string(),
            step_name: step.to_string(),
            task_id,
            meta: body.into_meta(),
        };
        self.objects.write(&key, SELF_RECORD, &record)?;
        tracing::debug!("Created task {}", record.pathspec());
        Ok(record)
    }

    pub fn get_task(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        task: &str,
    ) -> StoreResult<Option<TaskRecord>> {
        let key = ObjectKey::new(&[flow, run, step, task])?;
        Ok(self.objects.read(&key, SELF_RECORD))
    }

    pub fn list_tasks(&self, flow: &str, run: &str, step: &str) -> StoreResult<Vec<TaskRecord>> {
        let key = ObjectKey::new(&[flow, run, step])?;
        Ok(self.objects.list_child_records(&key))
    }

    /// Highest numeric task directory under any step of the run, 0 when none
    fn max_task_id_on_disk(&self, run_key: &ObjectKey) -> u64 {
        self.objects
            .list_children(run_key)
            .iter()
            .filter_map(|step| run_key.child(step).ok())
            .flat_map(|step_key| self.objects.list_children(&step_key))
            .filter_map(|task| task.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }

    // Artifacts

    /// Record artifacts; an (attempt, name) pair already on disk keeps its first record
    pub fn register_artifacts(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        task: &str,
        artifacts: &[Artifact],
    ) -> StoreResult<()> {
        let key = ObjectKey::new(&[flow, run, step, task])?;
        for artifact in artifacts {
            validate_record_part(&artifact.name)?;
        }
        for artifact in artifacts {
            let name = format!("{}{}{}", artifact.attempt_id, ARTIFACT_MARKER, artifact.name);
            if !self.objects.write_new(&key, &name, artifact)? {
                tracing::debug!("Artifact {}/{} already registered, keeping the first", key, name);
            }
        }
        tracing::debug!("Registered {} artifacts for {}", artifacts.len(), key);
        Ok(())
    }

    /// Artifacts of a task, optionally limited to one attempt
    ///
    /// Without a filter every attempt is returned, including attempts still in
    /// flight; there is no attempt-completion marker to consult.
    pub fn get_artifacts(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        task: &str,
        attempt: Option<u32>,
    ) -> StoreResult<Vec<Artifact>> {
        let key = ObjectKey::new(&[flow, run, step, task])?;
        Ok(self.objects.read_matching(&key, |name| {
            match name.split_once(ARTIFACT_MARKER) {
                Some((prefix, _)) => match attempt {
                    Some(attempt) => prefix.parse::<u32>().ok() == Some(attempt),
                    None => !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()),
                },
                None => false,
            }
        }))
    }

    // Metadata

    /// Append metadata entries; earlier entries with the same field are kept
    ///
    /// Record names never collide with existing ones, even across restarts.
    pub fn register_metadata(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        task: &str,
        entries: &[MetadataEntry],
    ) -> StoreResult<()> {
        let key = ObjectKey::new(&[flow, run, step, task])?;
        for entry in entries {
            validate_record_part(&entry.field_name)?;
        }
        for entry in entries {
            // A previous process may have issued timestamps ahead of the wall clock
            loop {
                let ts = self.registration_clock.tick();
                let name = format!("{}{}_{}", METADATA_PREFIX, entry.field_name, ts);
                if self.objects.write_new(&key, &name, entry)? {
                    break;
                }
            }
        }
        tracing::debug!("Registered {} metadata entries for {}", entries.len(), key);
        Ok(())
    }

    pub fn get_metadata(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        task: &str,
    ) -> StoreResult<Vec<MetadataEntry>> {
        let key = ObjectKey::new(&[flow, run, step, task])?;
        Ok(self
            .objects
            .read_matching(&key, |name| metadata_field(name).is_some()))
    }

    // Tags

    /// Add and remove user tags of a run; returns the final tag set, sorted
    ///
    /// Serialized within this process. Across processes this is an optimistic
    /// read-modify-write and the last writer wins.
    pub fn mutate_tags(&self, flow: &str, run: &str, mutation: &TagMutation) -> StoreResult<Vec<String>> {
        if let Some(bad) = mutation
            .tags_to_add
            .iter()
            .chain(&mutation.tags_to_remove)
            .find(|tag| tag.trim().is_empty())
        {
            return Err(StoreError::Validation(format!("invalid tag {:?}", bad)));
        }

        let key = ObjectKey::new(&[flow, run])?;
        let _guard = self.tag_lock.lock();
        let mut record: RunRecord = self
            .objects
            .read(&key, SELF_RECORD)
            .ok_or_else(|| StoreError::NotFound(format!("run {}/{}", flow, run)))?;

        let mut tags: Vec<String> = Vec::new();
        for tag in record.meta.tags.iter().chain(&mutation.tags_to_add) {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags.retain(|tag| !mutation.tags_to_remove.contains(tag));

        record.meta.tags = tags.clone();
        self.objects.write(&key, SELF_RECORD, &record)?;
        tracing::info!(
            "Mutated tags of run {}/{} (+{} -{})",
            flow,
            run,
            mutation.tags_to_add.len(),
            mutation.tags_to_remove.len()
        );

        tags.sort();
        Ok(tags)
    }

    // Filtering

    /// Pathspecs of the step's tasks that have a `field` entry whose value matches
    /// `pattern` (regex search semantics), ordered by task ID
    pub fn filter_tasks_by_metadata(
        &self,
        flow: &str,
        run: &str,
        step: &str,
        field: &str,
        pattern: &str,
    ) -> StoreResult<Vec<String>> {
        if field.is_empty() {
            return Ok(Vec::new());
        }
        let regex = Regex::new(pattern)
            .map_err(|e| StoreError::Validation(format!("invalid pattern {:?}: {}", pattern, e)))?;

        let step_key = ObjectKey::new(&[flow, run, step])?;
        let mut matched: Vec<String> = self
            .objects
            .list_children(&step_key)
            .into_iter()
            .filter(|task| {
                let task_key = match step_key.child(task) {
                    Ok(key) => key,
                    Err(_) => return false,
                };
                let entries: Vec<MetadataEntry> = self
                    .objects
                    .read_matching(&task_key, |name| metadata_field(name) == Some(field));
                entries
                    .iter()
                    .any(|entry| entry.field_name == field && regex.is_match(&entry.value_text()))
            })
            .collect();

        matched.sort_by_key(|task| (task.parse::<u64>().unwrap_or(u64::MAX), task.clone()));
        Ok(matched
            .into_iter()
            .map(|task| format!("{}/{}/{}/{}", flow, run, step, task))
            .collect())
    }
}

/// Field name of a `sysmeta_<field>_<ts>` record name
fn metadata_field(record_name: &str) -> Option<&str> {
    let rest = record_name.strip_prefix(METADATA_PREFIX)?;
    let (field, ts) = rest.rsplit_once('_')?;
    if field.is_empty() || ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(field)
}
