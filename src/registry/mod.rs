//! The durable map of job id to job record.
//!
//! A [`Registry`] is loaded once per process and written back with an
//! explicit [`Registry::save`]. There is no locking: one controlling process
//! per workspace is assumed to mutate the file at a time.

pub mod job;
pub mod store;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::Utc;

use crate::classifier::Classification;
use crate::command::CommandTemplate;
use crate::config::FarmConfig;
use crate::error::{FarmError, Result};
use crate::markers::MarkerStore;
use crate::scheduler::{ExternalId, SchedulerAdapter, SubmissionThrottle};

pub use job::{new_job_id, JobRecord, JobStatus};

/// A dependency given either by id or by a previously submitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentRef(String);

impl From<String> for DependentRef {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DependentRef {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&JobRecord> for DependentRef {
    fn from(record: &JobRecord) -> Self {
        Self(record.id.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub dependents: Vec<DependentRef>,
    pub switches: String,
}

impl SubmitOptions {
    pub fn after(mut self, dependent: impl Into<DependentRef>) -> Self {
        self.dependents.push(dependent.into());
        self
    }

    pub fn with_switches(mut self, switches: impl Into<String>) -> Self {
        self.switches = switches.into();
        self
    }
}

/// Which records an operator command applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Bucket(JobStatus),
    Id(String),
}

pub struct Registry {
    path: PathBuf,
    markers: MarkerStore,
    jobs: BTreeMap<String, JobRecord>,
    scheduler: Box<dyn SchedulerAdapter>,
    template: CommandTemplate,
    throttle: SubmissionThrottle,
}

impl Registry {
    pub fn new(
        path: PathBuf,
        markers: MarkerStore,
        scheduler: Box<dyn SchedulerAdapter>,
        template: CommandTemplate,
        throttle: SubmissionThrottle,
    ) -> Self {
        Self {
            path,
            markers,
            jobs: BTreeMap::new(),
            scheduler,
            template,
            throttle,
        }
    }

    /// Build a registry for `config`'s workspace and load its file.
    pub fn open(config: &FarmConfig, scheduler: Box<dyn SchedulerAdapter>) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::new(
            config.registry_path(),
            MarkerStore::new(config.logs_dir()),
            scheduler,
            CommandTemplate::new(config.template.clone()),
            SubmissionThrottle::new(config.throttle.clone()),
        );
        registry.load();
        Ok(registry)
    }

    pub fn load(&mut self) {
        self.jobs = store::load(&self.path);
    }

    /// Write the registry file. An empty registry never creates one, so a
    /// full clear stays cleared.
    pub fn save(&self) -> Result<()> {
        if self.jobs.is_empty() && !self.path.exists() {
            return Ok(());
        }
        store::save(&self.path, &self.jobs)?;
        tracing::debug!(path = %self.path.display(), jobs = self.jobs.len(), "Registry saved");
        Ok(())
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn scheduler(&self) -> &dyn SchedulerAdapter {
        self.scheduler.as_ref()
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut JobRecord> {
        self.jobs.get_mut(id)
    }

    /// Ids in submission order.
    pub fn ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Submit `command` and record it. Returns the new local id.
    ///
    /// A rejected submission is still recorded, with
    /// [`ExternalId::SubmitFailed`], and classifies as lost.
    pub fn submit_job(&mut self, command: &str, options: SubmitOptions) -> Result<String> {
        let dependent_ids: Vec<String> = options.dependents.into_iter().map(|d| d.0).collect();
        let dependent_external_ids = self.resolve_external_ids(&dependent_ids)?;

        self.markers.ensure_dir()?;

        let id = new_job_id();
        let external_id = self.issue(
            &id,
            &dependent_ids,
            &dependent_external_ids,
            command,
            &options.switches,
        );

        tracing::info!(
            job_id = %id,
            external_id = %external_id,
            dependents = dependent_ids.len(),
            "Job submitted"
        );

        let record = JobRecord::new(id.clone(), external_id, command.to_string(), options.switches)
            .with_dependents(dependent_ids, dependent_external_ids);
        self.jobs.insert(id.clone(), record);
        Ok(id)
    }

    /// Resubmit an existing record with its stored command, switches and
    /// dependents. All marker files for the id are removed first.
    pub fn resubmit_job(&mut self, id: &str) -> Result<()> {
        let (command, switches, dependent_ids) = match self.jobs.get(id) {
            Some(rec) => (rec.command.clone(), rec.switches.clone(), rec.dependent_ids.clone()),
            None => return Err(FarmError::JobNotFound(id.to_string())),
        };

        self.markers.clear(id)?;

        // Dependents may have been resubmitted since, so look their current
        // external ids up again; fall back to what was stored.
        let dependent_external_ids = match self.resolve_external_ids(&dependent_ids) {
            Ok(ids) => ids,
            Err(_) => self
                .jobs
                .get(id)
                .map(|rec| rec.dependent_external_ids.clone())
                .unwrap_or_default(),
        };

        let external_id =
            self.issue(id, &dependent_ids, &dependent_external_ids, &command, &switches);

        let record = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| FarmError::JobNotFound(id.to_string()))?;
        record.external_id = external_id;
        record.dependent_external_ids = dependent_external_ids;
        record.submitted_at = Utc::now();
        record.completed_at = None;
        record.status = None;
        record.submission_count += 1;

        tracing::info!(
            job_id = %id,
            external_id = %external_id,
            submission = record.submission_count,
            "Job resubmitted"
        );
        Ok(())
    }

    /// Resubmit every selected record. Returns how many were resubmitted.
    pub fn resubmit(&mut self, selection: &Selection, buckets: &Classification) -> Result<usize> {
        let ids = match selection {
            Selection::All => self.ids(),
            Selection::Bucket(status) => buckets.ids(*status).to_vec(),
            Selection::Id(id) => vec![id.clone()],
        };
        for id in &ids {
            self.resubmit_job(id)?;
        }
        Ok(ids.len())
    }

    pub fn remove(&mut self, id: &str) -> Result<JobRecord> {
        self.jobs
            .remove(id)
            .ok_or_else(|| FarmError::JobNotFound(id.to_string()))
    }

    /// Remove the selected records. Clearing everything also deletes the
    /// registry file and the logs directory.
    pub fn clear(&mut self, selection: &Selection, buckets: &Classification) -> Result<usize> {
        match selection {
            Selection::All => self.reset(),
            Selection::Bucket(status) => {
                let ids = buckets.ids(*status).to_vec();
                for id in &ids {
                    self.jobs.remove(id);
                }
                Ok(ids.len())
            }
            Selection::Id(id) => self.remove(id).map(|_| 1),
        }
    }

    /// Forget every record and delete all persisted state.
    pub fn reset(&mut self) -> Result<usize> {
        let removed = self.jobs.len();
        self.jobs.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.markers.remove_all()?;
        tracing::info!(removed, "Registry reset");
        Ok(removed)
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut JobRecord> {
        self.jobs.values_mut()
    }

    fn resolve_external_ids(&self, dependent_ids: &[String]) -> Result<Vec<u64>> {
        let mut external = Vec::with_capacity(dependent_ids.len());
        for dep in dependent_ids {
            let record = self
                .jobs
                .get(dep)
                .ok_or_else(|| FarmError::JobNotFound(dep.clone()))?;
            // A dependent that never reached the scheduler has nothing to
            // wait on; the worker-side check will fail the dependency.
            if let Some(n) = record.external_id.number() {
                external.push(n);
            }
        }
        Ok(external)
    }

    fn issue(
        &mut self,
        id: &str,
        dependent_ids: &[String],
        dependent_external_ids: &[u64],
        command: &str,
        switches: &str,
    ) -> ExternalId {
        let line = self.template.render(id, dependent_ids, command, switches);
        self.throttle.admit(self.scheduler.as_ref());
        self.scheduler.submit(&line, dependent_external_ids)
    }
}
