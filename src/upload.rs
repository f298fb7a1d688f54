use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::client::ArchiveClient;
use crate::domain::{LinkOutcome, Reference, ResourceKind};
use crate::error::CrucibleError;
use crate::parsers::markdown::split_by_kind;
use crate::plan::UploadPlan;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Outcome of one document upload: the created record plus one entry per
/// cross-link attempted afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub dsid: String,
    pub created: Value,
    pub outcomes: Vec<LinkOutcome>,
    pub warnings: Vec<String>,
}

impl UploadResult {
    /// `true` when every cross-link succeeded.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(LinkOutcome::is_success)
    }

    pub fn failed_links(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.is_success()).count()
    }
}

/// Result of an explicit link request between two existing records.
#[derive(Debug, Clone, Serialize)]
pub struct LinkResult {
    pub parent: String,
    pub parent_kind: ResourceKind,
    pub child: String,
    pub child_kind: ResourceKind,
    pub response: Value,
}

pub struct Uploader<C: ArchiveClient> {
    client: C,
}

impl<C: ArchiveClient> Uploader<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Creates the dataset, then links every referenced dataset as a child
    /// and attaches every referenced sample. Link failures are recorded in
    /// the result; only a failed creation is returned as an error.
    pub fn upload(
        &self,
        plan: &UploadPlan,
        references: &[Reference],
        sink: &dyn ProgressSink,
    ) -> Result<UploadResult, CrucibleError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Upload; creating dataset {} with {} file(s)",
                plan.mfid().unwrap_or("(server-assigned id)"),
                plan.files.len()
            ),
            elapsed: None,
        });

        let created = self
            .client
            .create_dataset(plan)
            .map_err(|err| CrucibleError::RemoteCreation(err.to_string()))?;
        let dsid = created
            .get("unique_id")
            .and_then(Value::as_str)
            .or(plan.mfid())
            .ok_or_else(|| {
                CrucibleError::RemoteCreation("created record has no unique_id".to_string())
            })?
            .to_string();
        sink.event(ProgressEvent {
            message: format!("phase=Upload; created dataset {dsid}"),
            elapsed: Some(started.elapsed()),
        });

        let linked = split_by_kind(references);
        let mut outcomes = Vec::with_capacity(linked.datasets.len() + linked.samples.len());

        for child in &linked.datasets {
            sink.event(ProgressEvent {
                message: format!("phase=Link; dataset {dsid} -> dataset {child}"),
                elapsed: None,
            });
            let outcome = match self.client.link_datasets(&dsid, child) {
                Ok(_) => LinkOutcome::success(ResourceKind::Dataset, child),
                Err(err) => {
                    tracing::warn!("failed to link dataset {child}: {err}");
                    LinkOutcome::failure(ResourceKind::Dataset, child, &err)
                }
            };
            outcomes.push(outcome);
        }

        for sample in &linked.samples {
            sink.event(ProgressEvent {
                message: format!("phase=Link; dataset {dsid} -> sample {sample}"),
                elapsed: None,
            });
            let outcome = match self.client.add_sample_to_dataset(&dsid, sample) {
                Ok(_) => LinkOutcome::success(ResourceKind::Sample, sample),
                Err(err) => {
                    tracing::warn!("failed to link sample {sample}: {err}");
                    LinkOutcome::failure(ResourceKind::Sample, sample, &err)
                }
            };
            outcomes.push(outcome);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} link(s) attempted", outcomes.len()),
            elapsed: Some(started.elapsed()),
        });

        Ok(UploadResult {
            dsid,
            created,
            outcomes,
            warnings: plan.warnings.clone(),
        })
    }
}

/// Links two existing records. With `kind` both ids are taken to be of that
/// kind; otherwise the archive is asked for each one's type.
pub fn link_resources<C: ArchiveClient + ?Sized>(
    client: &C,
    parent: &str,
    child: &str,
    kind: Option<ResourceKind>,
) -> Result<LinkResult, CrucibleError> {
    let (parent_kind, child_kind) = match kind {
        Some(kind) => (kind, kind),
        None => {
            let parent_type = client.get_resource_type(parent)?;
            let child_type = client.get_resource_type(child)?;
            tracing::info!("detected: parent is {parent_type}, child is {child_type}");
            match (
                parent_type.parse::<ResourceKind>(),
                child_type.parse::<ResourceKind>(),
            ) {
                (Ok(parent_kind), Ok(child_kind)) => (parent_kind, child_kind),
                _ => {
                    return Err(CrucibleError::LinkTypeMismatch {
                        parent: format!("{parent} ({parent_type})"),
                        child: format!("{child} ({child_type})"),
                    });
                }
            }
        }
    };

    let response = match (parent_kind, child_kind) {
        (ResourceKind::Dataset, ResourceKind::Dataset) => {
            tracing::info!("linking datasets: {parent} (parent) -> {child} (child)");
            client.link_datasets(parent, child)?
        }
        (ResourceKind::Sample, ResourceKind::Sample) => {
            tracing::info!("linking samples: {parent} (parent) -> {child} (child)");
            client.link_samples(parent, child)?
        }
        (ResourceKind::Dataset, ResourceKind::Sample) => {
            tracing::info!("linking sample {child} to dataset {parent}");
            client.add_sample_to_dataset(parent, child)?
        }
        (ResourceKind::Sample, ResourceKind::Dataset) => {
            tracing::info!("linking sample {parent} to dataset {child}");
            client.add_sample_to_dataset(child, parent)?
        }
    };

    Ok(LinkResult {
        parent: parent.to_string(),
        parent_kind,
        child: child.to_string(),
        child_kind,
        response,
    })
}
