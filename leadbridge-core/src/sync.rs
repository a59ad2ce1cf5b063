//! Batch dispatch of contacts into the CRM as leads.
//!
//! A [`SyncJob`] is built fresh for every dispatch and never resumed. The
//! backend performs the per-contact CRM work in one call and returns a result
//! list, which is reconciled into a ledger holding exactly one
//! [`ContactResult`] per dispatched contact. Partial failure is data, not an
//! error.
//!
//! Dispatch is not idempotent: sending the same contacts twice may create
//! duplicate leads unless the backend deduplicates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::config::Endpoints;
use crate::error::LeadbridgeError;
use crate::http::{ApiClient, ApiRequest};
use crate::model::{Contact, Pipeline, PipelineStatus, opt_string_or_number};

const MISSING_RESULT_DETAIL: &str = "no result returned for this contact";
const UNSPECIFIED_FAILURE_DETAIL: &str = "lead creation failed";

/// Outcome of one contact within a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactResult {
    /// Local id of the dispatched contact.
    pub contact_id: String,
    pub name: String,
    pub success: bool,
    /// Id of the contact record in the CRM.
    pub crm_contact_id: Option<String>,
    pub lead_id: Option<String>,
    /// Always present and non-empty when `success` is false.
    pub error_detail: Option<String>,
}

/// One dispatch of a set of contacts to a pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub pipeline_id: String,
    pub status_id: Option<String>,
    pub contacts: Vec<Contact>,
    /// Explicitly selected ids, sent along so the backend can tell an
    /// explicit selection from "everything".
    pub selected_ids: Vec<String>,
    pub ledger: Vec<ContactResult>,
    pub created_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(
        pipeline_id: impl Into<String>,
        status_id: Option<String>,
        contacts: Vec<Contact>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline_id.into().trim().to_string(),
            status_id: status_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            contacts,
            selected_ids: Vec::new(),
            ledger: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_selection(mut self, selected_ids: Vec<String>) -> Self {
        self.selected_ids = selected_ids;
        self
    }

    /// Reject a job that must not reach the network.
    pub fn validate(&self) -> Result<(), LeadbridgeError> {
        if self.pipeline_id.is_empty() {
            return Err(LeadbridgeError::validation(
                "select a pipeline before syncing",
            ));
        }
        if self.contacts.is_empty() {
            return Err(LeadbridgeError::validation("there are no contacts to sync"));
        }
        Ok(())
    }
}

/// Processed versus total, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 * 100.0 / self.total as f64).min(100.0)
    }
}

/// A finished dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub job: SyncJob,
    pub progress: Progress,
}

impl SyncReport {
    pub fn ledger(&self) -> &[ContactResult] {
        &self.job.ledger
    }

    pub fn successful(&self) -> usize {
        self.job.ledger.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.job.ledger.len() - self.successful()
    }

    /// Some contacts succeeded and some failed.
    pub fn is_partial_failure(&self) -> bool {
        self.successful() > 0 && self.failed() > 0
    }
}

#[derive(Serialize)]
struct GenerateLeadsRequest<'a> {
    pipeline_id: &'a str,
    status_id: Option<&'a str>,
    contacts: Vec<LeadContact<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_ids: Option<Vec<&'a str>>,
}

/// A contact in the shape the lead endpoint expects, whatever its origin.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeadContact<'a> {
    id: &'a str,
    name: &'a str,
    phone_number: &'a str,
    email: &'a str,
    source: &'static str,
}

impl<'a> From<&'a Contact> for LeadContact<'a> {
    fn from(contact: &'a Contact) -> Self {
        Self {
            id: contact.source_id(),
            name: &contact.name,
            phone_number: &contact.phone,
            email: contact.email.as_deref().unwrap_or(""),
            source: contact.origin.wire_source(),
        }
    }
}

#[derive(Deserialize)]
struct LeadResults {
    #[serde(default)]
    contacts: Vec<LeadResultWire>,
    #[serde(default)]
    processed: Option<usize>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeadResultWire {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    success: bool,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    contact_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    lead_id: Option<String>,
    #[serde(default, alias = "errorDetail", alias = "message")]
    error: Option<String>,
}

/// CRM-facing operations: pipeline lookups and lead dispatch.
#[derive(Debug, Clone)]
pub struct SyncOrchestrator {
    api: ApiClient,
    endpoints: Endpoints,
}

impl SyncOrchestrator {
    pub fn new(api: ApiClient, endpoints: Endpoints) -> Self {
        Self { api, endpoints }
    }

    /// Pipelines available in the CRM.
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>, LeadbridgeError> {
        let body = self
            .api
            .execute(ApiRequest::get(self.endpoints.pipelines.clone()))
            .await?;
        let pipelines = envelope_field(body, "pipelines", "failed to fetch pipelines")?;
        decode(pipelines, "pipelines")
    }

    /// Stages of one pipeline.
    pub async fn list_statuses(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<PipelineStatus>, LeadbridgeError> {
        let pipeline_id = pipeline_id.trim();
        if pipeline_id.is_empty() {
            return Err(LeadbridgeError::validation("pipeline id is required"));
        }
        let path = self.endpoints.pipeline_statuses_for(pipeline_id);
        let body = self.api.execute(ApiRequest::get(path)).await?;
        let statuses = envelope_field(body, "statuses", "failed to fetch pipeline statuses")?;
        decode(statuses, "statuses")
    }

    /// Dispatch `contacts` to a pipeline stage.
    pub async fn dispatch(
        &self,
        pipeline_id: &str,
        status_id: Option<&str>,
        contacts: Vec<Contact>,
    ) -> Result<SyncReport, LeadbridgeError> {
        self.dispatch_job(SyncJob::new(
            pipeline_id,
            status_id.map(str::to_string),
            contacts,
        ))
        .await
    }

    /// Dispatch a prepared job.
    ///
    /// Validation failures are returned before any request is sent. Failed
    /// contacts are not retried.
    pub async fn dispatch_job(&self, mut job: SyncJob) -> Result<SyncReport, LeadbridgeError> {
        job.validate()?;

        let request = {
            let payload = GenerateLeadsRequest {
                pipeline_id: &job.pipeline_id,
                status_id: job.status_id.as_deref(),
                contacts: job.contacts.iter().map(LeadContact::from).collect(),
                contact_ids: (!job.selected_ids.is_empty())
                    .then(|| wire_ids(&job.contacts, &job.selected_ids)),
            };
            ApiRequest::post(self.endpoints.generate_leads.clone()).json(&payload)?
        };

        tracing::info!(
            "Dispatching {} contacts to pipeline {} (job {})",
            job.contacts.len(),
            job.pipeline_id,
            job.id
        );
        let body = self.api.execute(request).await?;
        let results: LeadResults = decode(
            envelope_field(body, "results", "lead synchronization failed")?,
            "results",
        )?;

        let received = results.contacts.len();
        job.ledger = reconcile(&job.contacts, results.contacts);
        let progress = Progress {
            processed: results.processed.unwrap_or(received),
            total: results.total.unwrap_or(job.contacts.len()),
        };

        let report = SyncReport { job, progress };
        tracing::info!(
            "Sync job {} finished: {} succeeded, {} failed ({}/{} processed)",
            report.job.id,
            report.successful(),
            report.failed(),
            report.progress.processed,
            report.progress.total
        );
        Ok(report)
    }
}

/// Selected ids as the backend knows them.
fn wire_ids<'a>(contacts: &'a [Contact], selected: &'a [String]) -> Vec<&'a str> {
    selected
        .iter()
        .map(|id| {
            contacts
                .iter()
                .find(|c| &c.id == id)
                .map_or(id.as_str(), Contact::source_id)
        })
        .collect()
}

/// Build one ledger entry per dispatched contact.
///
/// Results echoing a dispatched id, local or source, are matched by id; the
/// rest are matched in order against the contacts still unmatched. A second
/// result for an already matched id is dropped. Contacts left without a
/// result are recorded as failures.
fn reconcile(contacts: &[Contact], results: Vec<LeadResultWire>) -> Vec<ContactResult> {
    // `None` marks an id shared by more than one contact.
    let mut index: HashMap<&str, Option<usize>> = HashMap::new();
    for (i, contact) in contacts.iter().enumerate() {
        index.insert(contact.id.as_str(), Some(i));
        let source = contact.source_id();
        if source != contact.id {
            index
                .entry(source)
                .and_modify(|slot| {
                    if *slot != Some(i) {
                        *slot = None;
                    }
                })
                .or_insert(Some(i));
        }
    }

    let mut matched: Vec<Option<LeadResultWire>> = Vec::with_capacity(contacts.len());
    matched.resize_with(contacts.len(), || None);
    let mut positional: VecDeque<LeadResultWire> = VecDeque::new();
    let mut duplicates = 0;

    for result in results {
        let slot = result
            .id
            .as_deref()
            .and_then(|id| index.get(id).copied().flatten());
        match slot {
            Some(i) if matched[i].is_some() => duplicates += 1,
            Some(i) => matched[i] = Some(result),
            None => positional.push_back(result),
        }
    }

    if duplicates > 0 {
        tracing::warn!("Dropped {} duplicate results from the backend", duplicates);
    }

    let ledger: Vec<ContactResult> = contacts
        .iter()
        .zip(matched)
        .map(|(contact, result)| match result.or_else(|| positional.pop_front()) {
            Some(result) => ledger_entry(contact, result),
            None => ContactResult {
                contact_id: contact.id.clone(),
                name: contact.name.clone(),
                success: false,
                crm_contact_id: None,
                lead_id: None,
                error_detail: Some(MISSING_RESULT_DETAIL.to_string()),
            },
        })
        .collect();

    if !positional.is_empty() {
        tracing::warn!(
            "Backend returned {} results for contacts that were not dispatched",
            positional.len()
        );
    }
    ledger
}

fn ledger_entry(contact: &Contact, result: LeadResultWire) -> ContactResult {
    let error_detail = if result.success {
        None
    } else {
        Some(
            result
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNSPECIFIED_FAILURE_DETAIL.to_string()),
        )
    };
    ContactResult {
        contact_id: contact.id.clone(),
        name: result
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| contact.name.clone()),
        success: result.success,
        crm_contact_id: result.contact_id,
        lead_id: result.lead_id,
        error_detail,
    }
}

/// Unwrap `{ success, <field> }`, turning `success: false` into a backend
/// error carrying the backend's message.
fn envelope_field(body: Value, field: &str, fallback: &str) -> Result<Value, LeadbridgeError> {
    let Value::Object(mut map) = body else {
        return Err(LeadbridgeError::backend(fallback));
    };
    let success = map.get("success").and_then(Value::as_bool).unwrap_or(true);
    match map.remove(field) {
        Some(value) if success && !value.is_null() => Ok(value),
        _ => {
            let message = map
                .get("message")
                .or_else(|| map.get("error"))
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(fallback);
            Err(LeadbridgeError::backend(message))
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, LeadbridgeError> {
    serde_json::from_value(value)
        .map_err(|e| LeadbridgeError::backend(format!("unexpected {} payload: {}", what, e)))
}
