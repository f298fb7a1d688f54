use std::fs;

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{DatasetRecord, Mfid};
use crate::error::CrucibleError;
use crate::parsers::Extraction;

/// Largest file sent through the HTTP upload endpoint.
pub const MAX_HTTP_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Caller-supplied values that take precedence over extracted ones.
#[derive(Debug, Clone, Default)]
pub struct UploadOverrides {
    pub name: Option<String>,
    pub metadata: Map<String, Value>,
    pub keywords: Vec<String>,
    pub project_id: Option<String>,
    pub mfid: Option<Mfid>,
    pub session_name: Option<String>,
    pub public: bool,
    pub instrument_name: Option<String>,
    pub owner_orcid: Option<String>,
    pub measurement: Option<String>,
    pub data_format: Option<String>,
    pub no_wait: bool,
}

/// Everything sent to the archive for one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct UploadPlan {
    pub record: DatasetRecord,
    pub scientific_metadata: Map<String, Value>,
    pub keywords: Vec<String>,
    pub files: Vec<Utf8PathBuf>,
    pub wait_for_ingestion: bool,
    pub warnings: Vec<String>,
}

impl UploadPlan {
    pub fn build(extraction: Extraction, overrides: UploadOverrides) -> Result<Self, CrucibleError> {
        let Some(primary) = extraction.files.first() else {
            return Err(CrucibleError::Metadata("nothing to upload".to_string()));
        };
        for path in &extraction.files {
            let size = fs::metadata(path.as_std_path())
                .map_err(|_| CrucibleError::MissingInputFile(path.as_std_path().to_path_buf()))?
                .len();
            if size > MAX_HTTP_UPLOAD_BYTES {
                return Err(CrucibleError::FileTooLarge {
                    path: path.as_std_path().to_path_buf(),
                    size,
                });
            }
        }

        // Without an identifier the archive assigns one.
        let mfid = overrides.mfid.or(extraction.mfid);
        let dataset_name = overrides
            .name
            .or(extraction.title)
            .or_else(|| primary.file_stem().map(str::to_string));
        let record = DatasetRecord {
            unique_id: mfid.map(|mfid| mfid.to_string()),
            dataset_name,
            public: overrides.public,
            owner_orcid: overrides.owner_orcid,
            project_id: overrides.project_id,
            instrument_name: overrides.instrument_name,
            measurement: overrides.measurement.or(extraction.measurement),
            session_name: overrides.session_name,
            creation_time: Some(
                chrono::Local::now()
                    .format("%Y-%m-%dT%H:%M:%S%.6f")
                    .to_string(),
            ),
            data_format: overrides.data_format.or(extraction.data_format),
            file_to_upload: primary.file_name().map(str::to_string),
            source_folder: primary.parent().map(|dir| dir.to_string()),
        };

        Ok(Self {
            record,
            scientific_metadata: merge_metadata(&extraction.metadata, &overrides.metadata),
            keywords: merge_keywords(&overrides.keywords, &extraction.keywords),
            files: extraction.files,
            wait_for_ingestion: !overrides.no_wait,
            warnings: extraction.warnings,
        })
    }

    pub fn mfid(&self) -> Option<&str> {
        self.record.unique_id.as_deref()
    }
}

/// Caller keywords first, then extracted ones; exact duplicates and blanks dropped.
pub fn merge_keywords(caller: &[String], extracted: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for keyword in caller.iter().chain(extracted) {
        let keyword = keyword.trim();
        if keyword.is_empty() || merged.iter().any(|known| known == keyword) {
            continue;
        }
        merged.push(keyword.to_string());
    }
    merged
}

/// Extracted metadata with the caller's entries applied on top.
pub fn merge_metadata(
    extracted: &Map<String, Value>,
    caller: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = extracted.clone();
    for (key, value) in caller {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn keywords_keep_caller_order_and_drop_duplicates() {
        let merged = merge_keywords(
            &strings(&["xrd", "note", "xrd"]),
            &strings(&["markdown", "note", "Note", " "]),
        );
        assert_eq!(merged, strings(&["xrd", "note", "markdown", "Note"]));
    }

    #[test]
    fn caller_metadata_wins() {
        let extracted = json!({"title": "From doc", "num_images": 2});
        let caller = json!({"title": "Override", "operator": "ada"});
        let merged = merge_metadata(
            extracted.as_object().unwrap(),
            caller.as_object().unwrap(),
        );
        assert_eq!(
            Value::Object(merged),
            json!({"title": "Override", "num_images": 2, "operator": "ada"})
        );
    }

    #[test]
    fn build_prefers_caller_name_then_title_then_stem() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("run-7.md")).unwrap();
        fs::write(&path, "# Run").unwrap();
        let extraction = Extraction {
            files: vec![path.clone()],
            title: Some("Run".to_string()),
            ..Extraction::default()
        };

        let titled = UploadPlan::build(extraction.clone(), UploadOverrides::default()).unwrap();
        assert_eq!(titled.record.dataset_name.as_deref(), Some("Run"));
        assert_eq!(titled.record.file_to_upload.as_deref(), Some("run-7.md"));
        assert!(titled.wait_for_ingestion);

        let named = UploadPlan::build(
            extraction.clone(),
            UploadOverrides {
                name: Some("Custom".to_string()),
                ..UploadOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(named.record.dataset_name.as_deref(), Some("Custom"));

        let untitled = UploadPlan::build(
            Extraction {
                title: None,
                ..extraction
            },
            UploadOverrides::default(),
        )
        .unwrap();
        assert_eq!(untitled.record.dataset_name.as_deref(), Some("run-7"));
        assert_eq!(untitled.mfid(), None);

        let identified = UploadPlan::build(
            Extraction {
                mfid: Some("0tcbwt4cp9x1z000bazhkv5gkg".parse().unwrap()),
                measurement: Some("MDNote".to_string()),
                ..untitled_extraction(&path)
            },
            UploadOverrides {
                measurement: Some("notes".to_string()),
                ..UploadOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(identified.mfid(), Some("0tcbwt4cp9x1z000bazhkv5gkg"));
        assert_eq!(identified.record.measurement.as_deref(), Some("notes"));
    }

    fn untitled_extraction(path: &Utf8PathBuf) -> Extraction {
        Extraction {
            files: vec![path.clone()],
            ..Extraction::default()
        }
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let err = UploadPlan::build(Extraction::default(), UploadOverrides::default()).unwrap_err();
        assert!(matches!(err, CrucibleError::Metadata(_)));
    }
}
