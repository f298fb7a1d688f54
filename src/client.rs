use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use camino::Utf8Path;

use crate::config::ResolvedConfig;
use crate::error::CrucibleError;
use crate::plan::{MAX_HTTP_UPLOAD_BYTES, UploadPlan};

pub const DEFAULT_LIMIT: usize = 100;
pub const INGESTION_CLASS: &str = "ApiUploadIngestor";
const UPLOAD_PREFIX: &str = "api-uploads";
const INGEST_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Signed URL for one file of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadLink {
    pub file_name: String,
    pub url: String,
}

/// Operations consumed from the remote archive.
pub trait ArchiveClient: Send + Sync {
    /// Creates the dataset record, attaches metadata, keywords and files and
    /// requests ingestion. Returns the created record.
    fn create_dataset(&self, plan: &UploadPlan) -> Result<Value, CrucibleError>;
    fn link_datasets(&self, parent: &str, child: &str) -> Result<Value, CrucibleError>;
    fn add_sample_to_dataset(&self, dataset: &str, sample: &str) -> Result<Value, CrucibleError>;
    fn link_samples(&self, parent: &str, child: &str) -> Result<Value, CrucibleError>;
    fn get_resource_type(&self, id: &str) -> Result<String, CrucibleError>;
    fn get_dataset(&self, id: &str, include_metadata: bool) -> Result<Value, CrucibleError>;
    fn list_datasets(&self, project: Option<&str>, limit: usize)
    -> Result<Vec<Value>, CrucibleError>;
    fn get_sample(&self, id: &str) -> Result<Value, CrucibleError>;
    fn list_samples(
        &self,
        project: Option<&str>,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>, CrucibleError>;
    fn list_projects(&self, limit: usize) -> Result<Vec<Value>, CrucibleError>;
    fn get_project(&self, id: &str) -> Result<Value, CrucibleError>;
    fn get_download_links(&self, id: &str) -> Result<Vec<DownloadLink>, CrucibleError>;
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), CrucibleError>;
}

#[derive(Clone)]
pub struct CrucibleHttpClient {
    client: Client,
    downloads: Client,
    api_url: String,
}

impl CrucibleHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CrucibleError> {
        let api_key = config.require_api_key()?;
        let agent = HeaderValue::from_str(&format!("crucible-client/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| CrucibleError::Http(err.to_string()))?;
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CrucibleError::ConfigKey("api_key contains invalid characters".to_string()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, agent.clone());
        headers.insert(AUTHORIZATION, bearer);
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| CrucibleError::Http(err.to_string()))?;

        // Signed download URLs must not carry the archive credentials.
        let mut plain = HeaderMap::new();
        plain.insert(USER_AGENT, agent);
        let downloads = Client::builder()
            .default_headers(plain)
            .timeout(timeout)
            .build()
            .map_err(|err| CrucibleError::Http(err.to_string()))?;

        Ok(Self {
            client,
            downloads,
            api_url: config.api_url.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<String, CrucibleError> {
        endpoint_url(&self.api_url, segments)
    }

    fn handle_status(response: Response) -> Result<Response, CrucibleError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "archive request failed".to_string());
        Err(CrucibleError::Status { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, CrucibleError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!("status {status}, retrying in {delay} ms");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!("{err}, retrying in {delay} ms");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CrucibleError::Http(err.to_string()));
                }
            }
        }
    }

    /// Sends the request and decodes the JSON body; an empty body is `null`.
    fn send_json<F>(&self, make_req: F) -> Result<Value, CrucibleError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let response = Self::handle_status(self.send_with_retries(make_req)?)?;
        let body = response
            .text()
            .map_err(|err| CrucibleError::Http(err.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| CrucibleError::UnexpectedResponse(err.to_string()))
    }

    fn get_list(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Vec<Value>, CrucibleError> {
        let url = self.url(segments)?;
        match self.send_json(|| self.client.get(&url).query(query))? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(CrucibleError::UnexpectedResponse(format!(
                "expected a list from {url}, got {other}"
            ))),
        }
    }

    fn upload_file(&self, dsid: &str, path: &Utf8Path) -> Result<Value, CrucibleError> {
        let size = fs::metadata(path.as_std_path())
            .map_err(|err| CrucibleError::Filesystem(format!("{path}: {err}")))?
            .len();
        if size > MAX_HTTP_UPLOAD_BYTES {
            return Err(CrucibleError::FileTooLarge {
                path: path.as_std_path().to_path_buf(),
                size,
            });
        }
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| CrucibleError::Filesystem(format!("{path}: {err}")))?;
        let file_name = path.file_name().unwrap_or("upload").to_string();
        let url = self.url(&["datasets", dsid, "upload"])?;
        tracing::info!("uploading {file_name} ({size} bytes)");
        self.send_json(|| {
            let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
            self.client
                .post(&url)
                .multipart(Form::new().part("files", part))
        })
    }

    fn wait_for_ingestion(&self, dsid: &str, request_id: &str) -> Result<Value, CrucibleError> {
        let url = self.url(&["datasets", dsid, "ingest", request_id])?;
        tracing::info!("waiting for ingestion request {request_id} to complete");
        loop {
            let status = self.send_json(|| self.client.get(&url))?;
            let state = status.get("status").and_then(Value::as_str).unwrap_or_default();
            if !matches!(state, "requested" | "started") {
                tracing::info!("ingestion finished with status: {state}");
                return Ok(status);
            }
            tracing::debug!("ingestion status: {state}");
            thread::sleep(INGEST_POLL_INTERVAL);
        }
    }
}

impl ArchiveClient for CrucibleHttpClient {
    fn create_dataset(&self, plan: &UploadPlan) -> Result<Value, CrucibleError> {
        let url = self.url(&["datasets"])?;
        let record = self.send_json(|| self.client.post(&url).json(&plan.record))?;
        let dsid = record
            .get("unique_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CrucibleError::UnexpectedResponse("dataset record without unique_id".to_string())
            })?
            .to_string();
        tracing::info!("created dataset {dsid}");

        if !plan.scientific_metadata.is_empty() {
            let url = self.url(&["datasets", dsid.as_str(), "scientific_metadata"])?;
            self.send_json(|| self.client.post(&url).json(&plan.scientific_metadata))?;
        }

        let url = self.url(&["datasets", dsid.as_str(), "keywords"])?;
        for keyword in &plan.keywords {
            self.send_json(|| self.client.post(&url).query(&[("keyword", keyword)]))?;
        }

        for file in &plan.files {
            self.upload_file(&dsid, file)?;
        }

        if let Some(file_name) = &plan.record.file_to_upload {
            let url = self.url(&["datasets", dsid.as_str(), "ingest"])?;
            let target = format!("{UPLOAD_PREFIX}/{file_name}");
            let request = self.send_json(|| {
                self.client.post(&url).query(&[
                    ("ingestion_class", INGESTION_CLASS),
                    ("file_to_upload", target.as_str()),
                ])
            })?;
            if plan.wait_for_ingestion {
                if let Some(request_id) = request.get("id").map(scalar_text) {
                    self.wait_for_ingestion(&dsid, &request_id)?;
                }
            }
        }

        Ok(record)
    }

    fn link_datasets(&self, parent: &str, child: &str) -> Result<Value, CrucibleError> {
        let url = self.url(&["datasets", parent, "children", child])?;
        self.send_json(|| self.client.post(&url))
    }

    fn add_sample_to_dataset(&self, dataset: &str, sample: &str) -> Result<Value, CrucibleError> {
        let url = self.url(&["datasets", dataset, "samples", sample])?;
        self.send_json(|| self.client.post(&url))
    }

    fn link_samples(&self, parent: &str, child: &str) -> Result<Value, CrucibleError> {
        let url = self.url(&["samples", parent, "children", child])?;
        self.send_json(|| self.client.post(&url))
    }

    fn get_resource_type(&self, id: &str) -> Result<String, CrucibleError> {
        let url = self.url(&["idtype", id])?;
        let response = self.send_json(|| self.client.get(&url)).map_err(|err| {
            if err.is_not_found() {
                CrucibleError::ResourceNotFound(id.to_string())
            } else {
                err
            }
        })?;
        response
            .get("object_type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CrucibleError::UnexpectedResponse(format!("no object_type for {id}")))
    }

    fn get_dataset(&self, id: &str, include_metadata: bool) -> Result<Value, CrucibleError> {
        let url = self.url(&["datasets", id])?;
        let mut dataset = self.send_json(|| self.client.get(&url))?;
        if dataset.is_null() {
            return Err(CrucibleError::ResourceNotFound(id.to_string()));
        }
        if include_metadata {
            let url = self.url(&["datasets", id, "scientific_metadata"])?;
            let metadata = self.send_json(|| self.client.get(&url))?;
            if let Some(record) = dataset.as_object_mut() {
                record.insert("scientific_metadata".to_string(), metadata);
            }
        }
        Ok(dataset)
    }

    fn list_datasets(
        &self,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>, CrucibleError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(project) = project {
            query.push(("project_id", project.to_string()));
        }
        self.get_list(&["datasets"], &query)
    }

    fn get_sample(&self, id: &str) -> Result<Value, CrucibleError> {
        let url = self.url(&["samples", id])?;
        match self.send_json(|| self.client.get(&url))? {
            Value::Null => Err(CrucibleError::ResourceNotFound(id.to_string())),
            sample => Ok(sample),
        }
    }

    fn list_samples(
        &self,
        project: Option<&str>,
        dataset: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>, CrucibleError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(dataset) = dataset {
            return self.get_list(&["datasets", dataset, "samples"], &query);
        }
        if let Some(project) = project {
            query.push(("project_id", project.to_string()));
        }
        self.get_list(&["samples"], &query)
    }

    fn list_projects(&self, limit: usize) -> Result<Vec<Value>, CrucibleError> {
        self.get_list(&["projects"], &[("limit", limit.to_string())])
    }

    fn get_project(&self, id: &str) -> Result<Value, CrucibleError> {
        let url = self.url(&["projects", id])?;
        match self.send_json(|| self.client.get(&url))? {
            Value::Null => Err(CrucibleError::ResourceNotFound(id.to_string())),
            project => Ok(project),
        }
    }

    fn get_download_links(&self, id: &str) -> Result<Vec<DownloadLink>, CrucibleError> {
        let url = self.url(&["datasets", id, "download_links"])?;
        let response = self.send_json(|| self.client.get(&url))?;
        let Value::Object(links) = response else {
            return Err(CrucibleError::UnexpectedResponse(format!(
                "expected a map of download links for {id}"
            )));
        };
        Ok(links
            .into_iter()
            .filter_map(|(file_name, url)| {
                url.as_str().map(|url| DownloadLink {
                    file_name,
                    url: url.to_string(),
                })
            })
            .collect())
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), CrucibleError> {
        let response = self.send_with_retries(|| self.downloads.get(url))?;
        let mut response = Self::handle_status(response)?;
        let parent = destination
            .parent()
            .ok_or_else(|| CrucibleError::Filesystem("invalid download destination".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".crucible-download")
            .tempfile_in(parent)
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut temp)
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        temp.flush()
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Downloads the files of a dataset whose names fully match `file_pattern`
/// (all files when absent). Existing files are skipped unless `overwrite`.
pub fn download_dataset<C: ArchiveClient + ?Sized>(
    client: &C,
    id: &str,
    file_pattern: Option<&str>,
    output_dir: &Path,
    overwrite: bool,
) -> Result<Vec<PathBuf>, CrucibleError> {
    let filter = file_pattern
        .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
        .transpose()
        .map_err(|err| CrucibleError::Metadata(format!("invalid file pattern: {err}")))?;
    fs::create_dir_all(output_dir).map_err(|err| {
        CrucibleError::Filesystem(format!("cannot create {}: {err}", output_dir.display()))
    })?;

    let mut downloaded = Vec::new();
    for link in client.get_download_links(id)? {
        if filter
            .as_ref()
            .is_some_and(|filter| !filter.is_match(&link.file_name))
        {
            continue;
        }
        let relative = Path::new(&link.file_name);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            tracing::warn!("skipping download with unsafe name: {}", link.file_name);
            continue;
        }
        let destination = output_dir.join(relative);
        if !overwrite && destination.exists() {
            tracing::info!("skipping existing file {}", destination.display());
            continue;
        }
        tracing::info!("downloading {}", link.file_name);
        client.download_file(&link.url, &destination)?;
        downloaded.push(destination);
    }
    Ok(downloaded)
}

/// Joins `segments` onto the API base, percent-encoding each one.
fn endpoint_url(base: &str, segments: &[&str]) -> Result<String, CrucibleError> {
    let mut url = Url::parse(base)
        .map_err(|err| CrucibleError::ConfigKey(format!("api_url={base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| CrucibleError::ConfigKey(format!("api_url={base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn ids_stay_inside_their_path_segment() {
        let base = "https://api.example/api/v1";
        assert_eq!(
            endpoint_url(base, &["datasets", "d1", "children", "d2"]).unwrap(),
            "https://api.example/api/v1/datasets/d1/children/d2"
        );
        assert_eq!(
            endpoint_url(base, &["datasets", "d1", "children", "../../projects/p1"]).unwrap(),
            "https://api.example/api/v1/datasets/d1/children/..%2F..%2Fprojects%2Fp1"
        );
        assert_eq!(
            endpoint_url(base, &["samples", "a b?x=1"]).unwrap(),
            "https://api.example/api/v1/samples/a%20b%3Fx=1"
        );
    }

    #[test]
    fn unusable_base_is_a_config_error() {
        assert_matches!(
            endpoint_url("not a url", &["datasets"]),
            Err(CrucibleError::ConfigKey(_))
        );
    }

    #[test]
    fn retry_classification() {
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }
}
