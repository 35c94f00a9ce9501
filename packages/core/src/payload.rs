//! Submission payloads, their validation rules and the priority policy.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::job::{JobId, JobKind, Priority};

const MAX_TARGET_DESCRIPTION_CHARS: usize = 20_000;

/// Optimize a stored document against a target description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOptimizationPayload {
    pub user_id: String,
    pub email: String,
    pub document_id: String,
    pub target_description: String,
    pub template_id: String,
    #[serde(default)]
    pub is_urgent: bool,
}

/// Builder packages offered for template generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageTier {
    Basic,
    Enhanced,
}

/// Generate a document from caller-supplied structured data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateGenerationPayload {
    pub user_id: String,
    pub email: String,
    pub structured_data: serde_json::Value,
    pub template_id: String,
    pub package_tier: PackageTier,
}

/// A file attached to a notification, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    pub file_name: String,
    pub content_type: String,
    pub content_base64: String,
}

impl AttachmentPayload {
    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content_base64: BASE64.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, ValidationError> {
        BASE64.decode(self.content_base64.as_bytes()).map_err(|_| {
            ValidationError::new(
                "attachments",
                format!("attachment '{}' is not valid base64", self.file_name),
            )
        })
    }
}

/// Deliver a templated notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub recipient: String,
    /// Which notification template the delivery engine should render.
    pub template: String,
    #[serde(default)]
    pub template_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,
}

/// The sweeps a maintenance job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperation {
    PurgeStaleDocuments,
    CancelStaleJobs,
    CleanupFailedRecords,
    ReclaimOrphanedJobs,
}

impl MaintenanceOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            MaintenanceOperation::PurgeStaleDocuments => "purge_stale_documents",
            MaintenanceOperation::CancelStaleJobs => "cancel_stale_jobs",
            MaintenanceOperation::CleanupFailedRecords => "cleanup_failed_records",
            MaintenanceOperation::ReclaimOrphanedJobs => "reclaim_orphaned_jobs",
        }
    }
}

impl std::fmt::Display for MaintenanceOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePayload {
    pub operation: MaintenanceOperation,
    /// Overrides the configured age threshold of the sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u64>,
}

impl MaintenancePayload {
    pub fn new(operation: MaintenanceOperation) -> Self {
        Self {
            operation,
            max_age_hours: None,
        }
    }
}

/// A validated-on-submit unit of work, one variant per job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    ResumeOptimization(ResumeOptimizationPayload),
    TemplateGeneration(TemplateGenerationPayload),
    Notification(NotificationPayload),
    Maintenance(MaintenancePayload),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::ResumeOptimization(_) => JobKind::ResumeOptimization,
            JobRequest::TemplateGeneration(_) => JobKind::TemplateGeneration,
            JobRequest::Notification(_) => JobKind::NotificationDelivery,
            JobRequest::Maintenance(_) => JobKind::Maintenance,
        }
    }

    /// Priority assigned by policy; callers cannot choose it.
    pub fn priority(&self) -> Priority {
        match self {
            JobRequest::ResumeOptimization(p) if p.is_urgent => Priority::URGENT,
            JobRequest::ResumeOptimization(_) => Priority::STANDARD,
            JobRequest::TemplateGeneration(p) => match p.package_tier {
                PackageTier::Enhanced => Priority::URGENT,
                PackageTier::Basic => Priority::ELEVATED,
            },
            JobRequest::Notification(_) | JobRequest::Maintenance(_) => Priority::STANDARD,
        }
    }

    /// The entity recorded alongside the job for lookups.
    pub fn related_entity_id(&self, job_id: JobId) -> Option<String> {
        match self {
            JobRequest::ResumeOptimization(p) => Some(p.document_id.clone()),
            JobRequest::TemplateGeneration(_) => Some(generated_document_id(job_id)),
            JobRequest::Notification(_) | JobRequest::Maintenance(_) => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            JobRequest::ResumeOptimization(p) => {
                require("userId", &p.user_id)?;
                validate_email("email", &p.email)?;
                require("documentId", &p.document_id)?;
                require("targetDescription", &p.target_description)?;
                if p.target_description.chars().count() > MAX_TARGET_DESCRIPTION_CHARS {
                    return Err(ValidationError::new(
                        "targetDescription",
                        format!("must be at most {MAX_TARGET_DESCRIPTION_CHARS} characters"),
                    ));
                }
                require("templateId", &p.template_id)
            }
            JobRequest::TemplateGeneration(p) => {
                require("userId", &p.user_id)?;
                validate_email("email", &p.email)?;
                require("templateId", &p.template_id)?;
                match p.structured_data.as_object() {
                    Some(map) if !map.is_empty() => Ok(()),
                    Some(_) => Err(ValidationError::new("structuredData", "must not be empty")),
                    None => Err(ValidationError::new("structuredData", "must be an object")),
                }
            }
            JobRequest::Notification(p) => {
                validate_email("recipient", &p.recipient)?;
                require("template", &p.template)?;
                if !(p.template_data.is_object() || p.template_data.is_null()) {
                    return Err(ValidationError::new("templateData", "must be an object"));
                }
                for attachment in &p.attachments {
                    require("attachments.fileName", &attachment.file_name)?;
                    require("attachments.contentType", &attachment.content_type)?;
                    attachment.decode()?;
                }
                Ok(())
            }
            JobRequest::Maintenance(p) => match p.max_age_hours {
                Some(0) => Err(ValidationError::new("maxAgeHours", "must be positive")),
                _ => Ok(()),
            },
        }
    }

    /// The JSON snapshot stored with the job and its record.
    pub fn to_payload(&self) -> serde_json::Value {
        let value = match self {
            JobRequest::ResumeOptimization(p) => serde_json::to_value(p),
            JobRequest::TemplateGeneration(p) => serde_json::to_value(p),
            JobRequest::Notification(p) => serde_json::to_value(p),
            JobRequest::Maintenance(p) => serde_json::to_value(p),
        };
        // Plain derived structs with string keys always serialize.
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Id of the document record a template generation job creates. Derived from
/// the job id so retried attempts reuse the same document.
pub fn generated_document_id(job_id: JobId) -> String {
    format!("doc-{job_id}")
}

/// Decode a stored job payload into its typed form.
pub fn decode_payload<T: DeserializeOwned>(
    kind: JobKind,
    value: &serde_json::Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(value.clone())
        .map_err(|_| ValidationError::new("payload", format!("malformed {kind} payload")))
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field, "is required"))
    } else {
        Ok(())
    }
}

fn validate_email(field: &str, value: &str) -> Result<(), ValidationError> {
    require(field, value)?;
    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new(field, "is not a valid email address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resume(is_urgent: bool) -> ResumeOptimizationPayload {
        ResumeOptimizationPayload {
            user_id: "user-1".into(),
            email: "ada@example.com".into(),
            document_id: "doc-1".into(),
            target_description: "Senior Rust engineer".into(),
            template_id: "modern".into(),
            is_urgent,
        }
    }

    fn template(tier: PackageTier) -> TemplateGenerationPayload {
        TemplateGenerationPayload {
            user_id: "user-1".into(),
            email: "ada@example.com".into(),
            structured_data: json!({"name": "Ada"}),
            template_id: "classic".into(),
            package_tier: tier,
        }
    }

    #[test]
    fn priority_policy() {
        assert_eq!(JobRequest::ResumeOptimization(resume(true)).priority(), Priority(1));
        assert_eq!(JobRequest::ResumeOptimization(resume(false)).priority(), Priority(5));
        let enhanced = JobRequest::TemplateGeneration(template(PackageTier::Enhanced));
        let basic = JobRequest::TemplateGeneration(template(PackageTier::Basic));
        assert_eq!(enhanced.priority(), Priority(1));
        assert_eq!(basic.priority(), Priority(3));
    }

    #[test]
    fn rejects_malformed_submissions() {
        let mut bad = resume(false);
        bad.email = "not-an-email".into();
        let err = JobRequest::ResumeOptimization(bad).validate().unwrap_err();
        assert_eq!(err.field, "email");

        let mut bad = template(PackageTier::Basic);
        bad.structured_data = json!([1, 2]);
        assert!(JobRequest::TemplateGeneration(bad).validate().is_err());

        let notification = NotificationPayload {
            recipient: "ada@example.com".into(),
            template: "welcome".into(),
            template_data: json!({}),
            attachments: vec![AttachmentPayload {
                file_name: "cv.pdf".into(),
                content_type: "application/pdf".into(),
                content_base64: "%%%".into(),
            }],
        };
        assert!(JobRequest::Notification(notification).validate().is_err());
    }

    #[test]
    fn accepts_well_formed_submissions() {
        assert!(JobRequest::ResumeOptimization(resume(true)).validate().is_ok());
        assert!(JobRequest::TemplateGeneration(template(PackageTier::Enhanced)).validate().is_ok());
    }

    #[test]
    fn unknown_package_tier_does_not_decode() {
        let value = json!({
            "userId": "u", "email": "a@b.co", "structuredData": {"a": 1},
            "templateId": "t", "packageTier": "platinum"
        });
        let decoded =
            decode_payload::<TemplateGenerationPayload>(JobKind::TemplateGeneration, &value);
        assert!(decoded.is_err());
    }

    #[test]
    fn unknown_maintenance_operation_does_not_decode() {
        let value = json!({"operation": "drop_everything"});
        assert!(decode_payload::<MaintenancePayload>(JobKind::Maintenance, &value).is_err());
    }
}
