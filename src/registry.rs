//! The job registry: a process-wide, read-only mapping from job name
//! to job descriptor, populated once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::RegistryError;
use crate::job::JobDescriptor;

/// Lightweight summary returned by `job_list`, rather than the full
/// descriptor (which isn't serializable — it owns a boxed callable).
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSummary {
    pub name: String,
    pub periodic: bool,
    pub timeout_secs: u64,
    pub can_overlap: bool,
}

/// Builder used at startup; registration is one-shot. Once built into
/// a [`JobRegistry`] the mapping is read-only and safely shared across
/// the scheduler and every worker without synchronization.
#[derive(Default)]
pub struct JobRegistryBuilder {
    descriptors: HashMap<String, JobDescriptor>,
}

impl JobRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job descriptor. Fails fast on duplicate names.
    pub fn register(&mut self, descriptor: JobDescriptor) -> Result<&mut Self, RegistryError> {
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(self)
    }

    pub fn build(self) -> JobRegistry {
        JobRegistry {
            descriptors: self.descriptors,
        }
    }
}

/// Immutable, process-wide job registry.
pub struct JobRegistry {
    descriptors: HashMap<String, JobDescriptor>,
}

pub type SharedJobRegistry = Arc<JobRegistry>;

impl JobRegistry {
    pub fn lookup(&self, name: &str) -> Result<&JobDescriptor, RegistryError> {
        self.descriptors
            .get(name)
            .ok_or_else(|| RegistryError::JobNotFound(name.to_string()))
    }

    /// All registered descriptors, optionally narrowed to `names`.
    pub fn list(&self, names: Option<&[String]>) -> Vec<JobSummary> {
        self.descriptors
            .values()
            .filter(|d| names.is_none_or(|ns| ns.iter().any(|n| n == &d.name)))
            .map(|d| JobSummary {
                name: d.name.clone(),
                periodic: d.schedule.is_some(),
                timeout_secs: d.timeout_secs,
                can_overlap: d.can_overlap,
            })
            .collect()
    }

    /// All periodic job descriptors, in registration (insertion) order
    /// is not guaranteed by `HashMap`; callers that need a stable
    /// tie-break order should sort by name, matching §4.3's
    /// "materialize in registration order" tie-break via a
    /// deterministic total order.
    pub fn periodic(&self) -> Vec<&JobDescriptor> {
        let mut descriptors: Vec<&JobDescriptor> = self
            .descriptors
            .values()
            .filter(|d| d.schedule.is_some())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobFuture, TaskContext};
    use serde_json::{Map, Value};

    struct NoopJob;
    impl Job for NoopJob {
        fn call(
            &self,
            _ctx: TaskContext,
            _args: Vec<Value>,
            _kwargs: Map<String, Value>,
        ) -> JobFuture {
            Box::pin(async { Ok(Value::Null) })
        }
    }

    fn descriptor(name: &str) -> JobDescriptor {
        JobDescriptor {
            name: name.to_string(),
            job: Box::new(NoopJob),
            schedule: None,
            default_args: vec![],
            default_kwargs: Map::new(),
            timeout_secs: 30,
            can_overlap: true,
            max_retries: 0,
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = JobRegistryBuilder::new();
        builder.register(descriptor("Addition")).unwrap();
        assert!(matches!(
            builder.register(descriptor("Addition")),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn lookup_missing_job_fails() {
        let registry = JobRegistryBuilder::new().build();
        assert!(matches!(
            registry.lookup("Unknown"),
            Err(RegistryError::JobNotFound(_))
        ));
    }
}
