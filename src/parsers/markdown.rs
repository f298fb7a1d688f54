//! Markdown note structure: headings, archive cross-references and local images.

use std::collections::HashSet;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;

use crate::domain::{ImageRef, Mfid, Reference, ResourceKind};
use crate::error::CrucibleError;
use crate::parsers::frontmatter::{Frontmatter, FrontmatterStyle, inject_field, parse_frontmatter};
use crate::parsers::identifier::{
    IDENTIFIER_FIELD, IdentifierResolution, ensure_identifier, existing_identifier,
};

/// URI scheme of archive links such as `crucible://dataset/<id>`.
pub const ARCHIVE_SCHEME: &str = "crucible";

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static WIKI_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([A-Za-z][A-Za-z_-]*):([^\]|]+)(?:\|([^\]]*))?\]\]").unwrap()
});
static SCHEME_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"crucible://([A-Za-z][A-Za-z_-]*)/([A-Za-z0-9_-]+)").unwrap());
static HYPERLINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\((https?://[^)\s]+)\)").unwrap());
static MD_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*(?:<([^>]+)>|([^)]+?))(?:\s+["'][^"']*["'])?\s*\)"#)
        .unwrap()
});
static HTML_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).unwrap()
});
static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]+:").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

/// Identifiers referenced by a note, split by kind, first-seen order, no repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkedRecords {
    pub datasets: Vec<String>,
    pub samples: Vec<String>,
}

impl LinkedRecords {
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.samples.is_empty()
    }
}

/// A markdown note read from disk.
#[derive(Debug, Clone)]
pub struct Document {
    path: Utf8PathBuf,
    source: String,
    body: String,
    frontmatter: Frontmatter,
}

impl Document {
    pub fn read(path: &Utf8Path, style: FrontmatterStyle) -> Result<Self, CrucibleError> {
        let absolute = fs::canonicalize(path.as_std_path())
            .map_err(|_| CrucibleError::MissingInputFile(path.as_std_path().to_path_buf()))?;
        let path = Utf8PathBuf::from_path_buf(absolute)
            .map_err(|path| CrucibleError::Filesystem(format!("non UTF-8 path: {}", path.display())))?;
        let source = fs::read_to_string(path.as_std_path())
            .map_err(|err| CrucibleError::Filesystem(format!("read {path}: {err}")))?;
        Ok(Self::from_source(path, source, style))
    }

    pub fn from_source(path: Utf8PathBuf, source: String, style: FrontmatterStyle) -> Self {
        let (frontmatter, body) = parse_frontmatter(&source, style);
        let body = body.to_string();
        Self {
            path,
            source,
            body,
            frontmatter,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn directory(&self) -> &Utf8Path {
        self.path.parent().unwrap_or(Utf8Path::new("."))
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn frontmatter(&self) -> &Frontmatter {
        &self.frontmatter
    }

    /// See [`ensure_identifier`]. The stored source follows a successful rewrite.
    pub fn resolve_identifier(&mut self) -> Result<IdentifierResolution, CrucibleError> {
        let resolution =
            ensure_identifier(&mut self.frontmatter, self.path.as_std_path(), &self.source)?;
        if resolution.injected {
            self.source = inject_field(&self.source, IDENTIFIER_FIELD, resolution.mfid.as_str());
        }
        Ok(resolution)
    }

    pub fn identifier(&self) -> Option<Mfid> {
        existing_identifier(&self.frontmatter)
    }

    pub fn headings(&self) -> Vec<Heading> {
        extract_headings(&self.body)
    }

    pub fn references(&self, web_host: Option<&str>) -> Vec<Reference> {
        extract_references(&self.body, web_host)
    }

    pub fn images(&self) -> Vec<ImageRef> {
        extract_images(&self.body, self.directory())
    }
}

pub fn extract_headings(body: &str) -> Vec<Heading> {
    body.lines()
        .filter_map(|line| {
            let captures = HEADING.captures(line.trim_end_matches('\r'))?;
            Some(Heading {
                level: captures[1].len() as u8,
                text: captures[2].trim().to_string(),
            })
        })
        .collect()
}

/// Text of the first level-1 heading.
pub fn first_title(headings: &[Heading]) -> Option<&str> {
    headings
        .iter()
        .find(|heading| heading.level == 1)
        .map(|heading| heading.text.as_str())
}

/// Collects references from the three link grammars, wiki links first, then
/// `crucible://` URIs, then hyperlinks into the archive web host. The
/// hyperlink grammar is skipped when no host is known.
pub fn extract_references(body: &str, web_host: Option<&str>) -> Vec<Reference> {
    let mut references = Vec::new();

    for captures in WIKI_LINK.captures_iter(body) {
        let Some(kind) = reference_kind(&captures[1]) else {
            continue;
        };
        let id = captures[2].trim();
        if !is_record_id(id) {
            tracing::debug!("ignoring reference with malformed id: {id:?}");
            continue;
        }
        references.push(Reference {
            kind,
            id: id.to_string(),
            label: captures
                .get(3)
                .map(|label| label.as_str().trim().to_string())
                .filter(|label| !label.is_empty()),
        });
    }

    for captures in SCHEME_LINK.captures_iter(body) {
        if let Some(kind) = reference_kind(&captures[1]) {
            references.push(Reference {
                kind,
                id: captures[2].to_string(),
                label: None,
            });
        }
    }

    if let Some(host) = web_host.and_then(normalize_host) {
        for captures in HYPERLINK.captures_iter(body) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if body[..whole.start()].ends_with('!') {
                continue;
            }
            if let Some((kind, id)) = archive_url_target(&captures[2], &host) {
                let label = captures[1].trim();
                references.push(Reference {
                    kind,
                    id,
                    label: (!label.is_empty()).then(|| label.to_string()),
                });
            }
        }
    }

    references
}

/// Splits references by kind, keeping the first occurrence of each
/// identifier regardless of which grammar produced it.
pub fn split_by_kind(references: &[Reference]) -> LinkedRecords {
    let mut linked = LinkedRecords::default();
    let mut seen = HashSet::new();
    for reference in references {
        if !seen.insert((reference.kind, reference.id.as_str())) {
            continue;
        }
        match reference.kind {
            ResourceKind::Dataset => linked.datasets.push(reference.id.clone()),
            ResourceKind::Sample => linked.samples.push(reference.id.clone()),
        }
    }
    linked
}

fn reference_kind(raw: &str) -> Option<ResourceKind> {
    match raw.parse::<ResourceKind>() {
        Ok(kind) => Some(kind),
        Err(_) => {
            tracing::debug!("ignoring reference of unknown kind: {raw}");
            None
        }
    }
}

/// Same alphabet the `crucible://` grammar accepts.
fn is_record_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

fn normalize_host(host: &str) -> Option<String> {
    let trimmed = host.trim();
    let bare = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url.host_str().map(str::to_string),
        _ => Some(trimmed.trim_end_matches('/').to_string()),
    };
    bare.filter(|host| !host.is_empty())
        .map(|host| host.to_ascii_lowercase())
}

/// `https://<host>/[...]/dataset/<id>` or `.../sample/<id>` (the graph
/// explorer's `sample-graph` path counts as a sample).
fn archive_url_target(raw: &str, host: &str) -> Option<(ResourceKind, String)> {
    let url = Url::parse(raw).ok()?;
    if url.host_str()?.to_ascii_lowercase() != host {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let [.., kind, id] = segments.as_slice() else {
        return None;
    };
    let kind = match *kind {
        "dataset" => ResourceKind::Dataset,
        "sample" | "sample-graph" => ResourceKind::Sample,
        _ => return None,
    };
    is_record_id(id).then(|| (kind, id.to_string()))
}

/// Local images referenced through `![alt](path)` or `<img src="path">`.
/// Remote sources are dropped; missing files are kept with `exists == false`.
pub fn extract_images(body: &str, directory: &Utf8Path) -> Vec<ImageRef> {
    let markdown = MD_IMAGE.captures_iter(body).filter_map(|captures| {
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|source| source.as_str().trim().to_string())
    });
    let html = HTML_IMAGE
        .captures_iter(body)
        .map(|captures| captures[1].trim().to_string());
    let sources = markdown.chain(html);

    let mut images = Vec::new();
    let mut seen = HashSet::new();
    for source in sources {
        if source.is_empty() || is_remote(&source) {
            continue;
        }
        let image = resolve_image(&source, directory);
        if !seen.insert(image.path.clone()) {
            continue;
        }
        if !image.exists {
            tracing::warn!("referenced image not found: {source}");
        }
        images.push(image);
    }
    images
}

fn is_remote(source: &str) -> bool {
    source.starts_with("//") || URL_SCHEME.is_match(source)
}

fn resolve_image(source: &str, directory: &Utf8Path) -> ImageRef {
    let joined = directory.join(source);
    let canonical = fs::canonicalize(joined.as_std_path())
        .ok()
        .filter(|path| path.is_file())
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok());
    match canonical {
        Some(path) => ImageRef {
            reference: source.to_string(),
            path,
            exists: true,
        },
        None => ImageRef {
            reference: source.to_string(),
            path: normalize(&joined),
            exists: false,
        },
    }
}

fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut normalized = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_title() {
        let body = "intro\n## Setup\n# Results\n####### too deep\n#nospace\n### Notes  \n# Second";
        let headings = extract_headings(body);
        assert_eq!(
            headings,
            vec![
                Heading { level: 2, text: "Setup".to_string() },
                Heading { level: 1, text: "Results".to_string() },
                Heading { level: 3, text: "Notes".to_string() },
                Heading { level: 1, text: "Second".to_string() },
            ]
        );
        assert_eq!(first_title(&headings), Some("Results"));
        assert_eq!(first_title(&extract_headings("## only h2")), None);
    }

    #[test]
    fn wiki_links_with_labels_and_unknown_kinds() {
        let body = "[[dataset:abc]] [[sample:s1|Wafer 3]] [[project:p9]] [[dataset: def ]]";
        let refs = extract_references(body, None);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[1].kind, ResourceKind::Sample);
        assert_eq!(refs[1].label.as_deref(), Some("Wafer 3"));
        assert_eq!(refs[2].id, "def");
    }

    #[test]
    fn hyperlinks_need_the_archive_host() {
        let body = "[a](https://archive-host/dataset/d1) [b](https://other/dataset/d2) \
                    ![img](https://archive-host/dataset/d3) [c](https://archive-host/proj/sample-graph/s1)";
        let refs = extract_references(body, Some("https://archive-host/"));
        let ids: Vec<_> = refs.iter().map(|r| (r.kind, r.id.as_str())).collect();
        assert_eq!(
            ids,
            vec![(ResourceKind::Dataset, "d1"), (ResourceKind::Sample, "s1")]
        );
        assert!(extract_references(body, None).is_empty());
    }

    #[test]
    fn wiki_ids_outside_the_id_alphabet_are_ignored() {
        let body = "[[dataset:../../projects/p1]] [[sample:a b?x=1]] [[dataset:ok_1-a]]";
        let refs = extract_references(body, None);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "ok_1-a");
    }

    #[test]
    fn scheme_links_stop_at_punctuation() {
        let refs = extract_references("see crucible://sample/abc9. and crucible://foo/x", None);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "abc9");
    }

    #[test]
    fn normalize_drops_dot_segments() {
        assert_eq!(
            normalize(Utf8Path::new("/notes/./img/../a.png")),
            Utf8PathBuf::from("/notes/a.png")
        );
    }

    #[test]
    fn remote_sources_are_detected() {
        assert!(is_remote("https://example.com/a.png"));
        assert!(is_remote("//cdn.example.com/a.png"));
        assert!(is_remote("data:image/png;base64,AAAA"));
        assert!(!is_remote("./img/a.png"));
        assert!(!is_remote("img/a.png"));
    }
}
