use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::Value;

use crucible_client::client::{ArchiveClient, DownloadLink, download_dataset};
use crucible_client::error::CrucibleError;
use crucible_client::plan::UploadPlan;

struct FileServer {
    links: Vec<DownloadLink>,
    fetched: Mutex<Vec<String>>,
}

impl FileServer {
    fn new(names: &[&str]) -> Self {
        Self {
            links: names
                .iter()
                .map(|name| DownloadLink {
                    file_name: name.to_string(),
                    url: format!("https://storage.example/signed/{name}"),
                })
                .collect(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

fn unsupported() -> CrucibleError {
    CrucibleError::UnexpectedResponse("not served by this mock".to_string())
}

impl ArchiveClient for FileServer {
    fn create_dataset(&self, _plan: &UploadPlan) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn link_datasets(&self, _parent: &str, _child: &str) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn add_sample_to_dataset(&self, _dataset: &str, _sample: &str) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn link_samples(&self, _parent: &str, _child: &str) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn get_resource_type(&self, _id: &str) -> Result<String, CrucibleError> {
        Ok("dataset".to_string())
    }

    fn get_dataset(&self, _id: &str, _include_metadata: bool) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn list_datasets(
        &self,
        _project: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<Value>, CrucibleError> {
        Ok(Vec::new())
    }

    fn get_sample(&self, _id: &str) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn list_samples(
        &self,
        _project: Option<&str>,
        _dataset: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<Value>, CrucibleError> {
        Ok(Vec::new())
    }

    fn list_projects(&self, _limit: usize) -> Result<Vec<Value>, CrucibleError> {
        Ok(Vec::new())
    }

    fn get_project(&self, _id: &str) -> Result<Value, CrucibleError> {
        Err(unsupported())
    }

    fn get_download_links(&self, id: &str) -> Result<Vec<DownloadLink>, CrucibleError> {
        if id == "missing" {
            return Err(CrucibleError::ResourceNotFound(id.to_string()));
        }
        Ok(self.links.clone())
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), CrucibleError> {
        self.fetched.lock().unwrap().push(url.to_string());
        fs::write(destination, url).map_err(|err| CrucibleError::Filesystem(err.to_string()))
    }
}

#[test]
fn pattern_must_match_the_whole_name() {
    let temp = tempfile::tempdir().unwrap();
    let server = FileServer::new(&["scan.csv", "scan.csv.bak", "notes.md"]);

    let written = download_dataset(&server, "ds1", Some(r".*\.csv"), temp.path(), true).unwrap();
    assert_eq!(written, vec![temp.path().join("scan.csv")]);
    assert_eq!(
        fs::read_to_string(temp.path().join("scan.csv")).unwrap(),
        "https://storage.example/signed/scan.csv"
    );
}

#[test]
fn existing_files_are_kept_unless_overwriting() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "local").unwrap();
    let server = FileServer::new(&["a.txt", "b.txt"]);

    let written = download_dataset(&server, "ds1", None, temp.path(), false).unwrap();
    assert_eq!(written, vec![temp.path().join("b.txt")]);
    assert_eq!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "local");

    let written = download_dataset(&server, "ds1", None, temp.path(), true).unwrap();
    assert_eq!(written.len(), 2);
    assert_ne!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "local");
}

#[test]
fn names_escaping_the_output_directory_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let output = temp.path().join("out");
    let server = FileServer::new(&["../escape.txt", "/etc/passwd", "ok.txt"]);

    let written = download_dataset(&server, "ds1", None, &output, true).unwrap();
    assert_eq!(written, vec![output.join("ok.txt")]);
    assert_eq!(
        server.fetched(),
        vec!["https://storage.example/signed/ok.txt"]
    );
    assert!(!temp.path().join("escape.txt").exists());
}

#[test]
fn bad_pattern_and_unknown_dataset_fail() {
    let temp = tempfile::tempdir().unwrap();
    let server = FileServer::new(&[]);
    assert_matches!(
        download_dataset(&server, "ds1", Some("("), temp.path(), true),
        Err(CrucibleError::Metadata(_))
    );
    let err = download_dataset(&server, "missing", None, temp.path(), true).unwrap_err();
    assert!(err.is_not_found());
}
