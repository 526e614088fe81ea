use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_GRADE: &str = "N/A";
pub const FILE_ONLY_DETAILS: &str = "File Uploaded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    Attendance,
    Task,
    Behavior,
    Note,
    #[serde(rename = "Permission Slip")]
    PermissionSlip,
    #[serde(rename = "File Upload")]
    FileUpload,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Attendance => "Attendance",
            ActivityType::Task => "Task",
            ActivityType::Behavior => "Behavior",
            ActivityType::Note => "Note",
            ActivityType::PermissionSlip => "Permission Slip",
            ActivityType::FileUpload => "File Upload",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Attendance" => Some(ActivityType::Attendance),
            "Task" => Some(ActivityType::Task),
            "Behavior" => Some(ActivityType::Behavior),
            "Note" => Some(ActivityType::Note),
            "Permission Slip" => Some(ActivityType::PermissionSlip),
            "File Upload" => Some(ActivityType::FileUpload),
            _ => None,
        }
    }
}

/// File attached to an entry. `data` is standard base64 of the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: String,
}

impl Attachment {
    pub fn decode(&self) -> Result<Vec<u8>, ValidationError> {
        STANDARD
            .decode(self.data.trim())
            .map_err(|_| ValidationError::BadAttachment)
    }
}

/// Fields of an activity as entered on the teacher dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub student_name: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default)]
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("unknown activity type: {0}")]
    UnknownType(String),
    #[error("score must be a finite number")]
    BadScore,
    #[error("attachment data must be base64")]
    BadAttachment,
}

impl ActivityPayload {
    /// Parses a raw params object. Unknown `type` strings are reported by
    /// name instead of as a generic serde failure.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, ValidationError> {
        let Some(obj) = raw.as_object() else {
            return Err(ValidationError::Missing("payload"));
        };
        match obj.get("type") {
            Some(serde_json::Value::String(t)) => {
                if ActivityType::parse(t).is_none() {
                    return Err(ValidationError::UnknownType(t.clone()));
                }
            }
            _ => return Err(ValidationError::Missing("type")),
        }
        if !obj.get("studentName").is_some_and(|v| v.is_string()) {
            return Err(ValidationError::Missing("studentName"));
        }
        if let Some(score) = obj.get("score") {
            if !score.is_null() && !score.is_number() {
                return Err(ValidationError::BadScore);
            }
        }
        let payload: ActivityPayload = serde_json::from_value(raw.clone())
            .map_err(|_| ValidationError::Missing("payload"))?;
        payload.normalized()
    }

    /// Trims fields, applies defaults and checks required fields.
    pub fn normalized(mut self) -> Result<Self, ValidationError> {
        self.student_name = self.student_name.trim().to_string();
        self.grade = self.grade.trim().to_string();
        self.subject = self.subject.trim().to_string();
        self.details = self.details.trim().to_string();

        if self.student_name.is_empty() {
            return Err(ValidationError::Missing("studentName"));
        }
        if self.grade.is_empty() {
            self.grade = DEFAULT_GRADE.to_string();
        }
        if let Some(att) = &self.attachment {
            att.decode()?;
            if att.file_name.trim().is_empty() {
                return Err(ValidationError::Missing("attachment.fileName"));
            }
        }
        if self.details.is_empty() {
            if self.attachment.is_some() {
                self.details = FILE_ONLY_DETAILS.to_string();
            } else {
                return Err(ValidationError::Missing("details"));
            }
        }
        if let Some(s) = self.score {
            if !s.is_finite() {
                return Err(ValidationError::BadScore);
            }
        }
        Ok(self)
    }
}

/// A stored activity as returned by either store backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: String,
    pub student_name: String,
    pub grade: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ActivityRecord {
    /// Record as it would be stored for `payload`, before any acknowledgement.
    pub fn from_payload(id: String, payload: &ActivityPayload, timestamp: DateTime<Utc>) -> Self {
        let att = payload.attachment.as_ref();
        ActivityRecord {
            id,
            student_name: payload.student_name.clone(),
            grade: payload.grade.clone(),
            subject: payload.subject.clone(),
            kind: payload.kind,
            details: payload.details.clone(),
            score: payload.score,
            attachment_name: att.map(|a| a.file_name.clone()),
            attachment_type: att.map(|a| a.mime_type.clone()),
            attachment_url: att.map(|a| format!("data:{};base64,{}", a.mime_type, a.data)),
            timestamp,
            acknowledged_by: None,
            acknowledged_at: None,
            signature: None,
        }
    }
}

pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Accepts only base64 data URIs, e.g. a signature pad PNG export.
pub fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(data).ok()?;
    Some((mime.to_string(), bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
