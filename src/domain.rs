use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CrucibleError;

const CROCKFORD: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Globally unique archive identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mfid(String);

impl Mfid {
    /// 26 lowercase Crockford base32 characters carrying a random 128-bit value.
    pub fn generate() -> Self {
        let value = uuid::Uuid::new_v4().as_u128();
        let encoded = (0..26)
            .rev()
            .map(|index| CROCKFORD[((value >> (index * 5)) & 0x1f) as usize] as char)
            .collect();
        Self(encoded)
    }

    /// An identifier already stored in a document. Any non-empty value is
    /// kept as written so existing records stay addressable.
    pub fn from_document(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mfid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Mfid {
    type Err = CrucibleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.chars().any(|ch| ch.is_whitespace() || ch == '/');
        if !is_valid {
            return Err(CrucibleError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Dataset,
    Sample,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Dataset => "dataset",
            ResourceKind::Sample => "sample",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CrucibleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dataset" => Ok(ResourceKind::Dataset),
            "sample" => Ok(ResourceKind::Sample),
            _ => Err(CrucibleError::InvalidResourceKind(value.to_string())),
        }
    }
}

/// A cross-link from a document to another archive record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub kind: ResourceKind,
    pub id: String,
    pub label: Option<String>,
}

/// A local image referenced by a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub reference: String,
    pub path: Utf8PathBuf,
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Success,
    Error,
}

/// Result of one cross-link call made during an upload.
#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub kind: ResourceKind,
    pub target: String,
    pub status: LinkStatus,
    pub error: Option<String>,
}

impl LinkOutcome {
    pub fn success(kind: ResourceKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            status: LinkStatus::Success,
            error: None,
        }
    }

    pub fn failure(kind: ResourceKind, target: &str, error: &CrucibleError) -> Self {
        Self {
            kind,
            target: target.to_string(),
            status: LinkStatus::Error,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LinkStatus::Success
    }
}

/// Dataset creation payload sent to `POST /datasets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_orcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_to_upload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_folder: Option<String>,
}
