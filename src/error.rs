use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CrucibleError {
    #[error("input file not found: {0}")]
    MissingInputFile(PathBuf),

    #[error("malformed frontmatter: {0}")]
    MalformedFrontmatter(String),

    #[error("failed to write identifier {mfid} back to {path}: {message}")]
    IdentifierWrite {
        path: PathBuf,
        mfid: String,
        message: String,
    },

    #[error("unsupported dataset type: {0}")]
    #[diagnostic(help("available types: generic, mdnote, lammps"))]
    UnsupportedFormat(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid resource kind: {0}")]
    InvalidResourceKind(String),

    #[error("missing config file at {0}")]
    #[diagnostic(help("run `crucible config init` first"))]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown or invalid config key: {0}")]
    ConfigKey(String),

    #[error("no API key configured")]
    #[diagnostic(help("set CRUCIBLE_API_KEY or run `crucible config set api_key <KEY>`"))]
    MissingApiKey,

    #[error("archive request failed: {0}")]
    Http(String),

    #[error("archive returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("dataset creation failed: {0}")]
    RemoteCreation(String),

    #[error("unexpected archive response: {0}")]
    UnexpectedResponse(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("cannot link {parent} to {child}")]
    #[diagnostic(help("valid combinations: dataset-dataset, sample-sample, dataset-sample"))]
    LinkTypeMismatch { parent: String, child: String },

    #[error("file too large for HTTP upload ({size} bytes): {path}")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid metadata: {0}")]
    Metadata(String),

    #[error("LAMMPS parse error: {0}")]
    Lammps(String),

    #[error("failed to open browser: {0}")]
    Browser(String),
}

impl CrucibleError {
    /// Remote failures that say the target record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CrucibleError::Status { status: 404, .. } | CrucibleError::ResourceNotFound(_)
        )
    }
}
