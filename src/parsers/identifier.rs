use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use crate::domain::Mfid;
use crate::error::CrucibleError;
use crate::parsers::frontmatter::{Frontmatter, inject_field};

/// Frontmatter field reserved for the archive identifier.
pub const IDENTIFIER_FIELD: &str = "mfid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierResolution {
    pub mfid: Mfid,
    /// `true` when the identifier was generated and written to the document.
    pub injected: bool,
}

/// Reads the identifier from `frontmatter`, or generates one, stores it in
/// the map and rewrites the document at `path` so later runs reuse it.
///
/// When the rewrite fails the map already holds the new identifier and the
/// returned [`CrucibleError::IdentifierWrite`] carries it, so the current
/// upload can still proceed.
pub fn ensure_identifier(
    frontmatter: &mut Frontmatter,
    path: &Path,
    source: &str,
) -> Result<IdentifierResolution, CrucibleError> {
    if let Some(mfid) = existing_identifier(frontmatter) {
        return Ok(IdentifierResolution {
            mfid,
            injected: false,
        });
    }

    let mfid = Mfid::generate();
    frontmatter.insert(
        IDENTIFIER_FIELD.to_string(),
        Value::String(mfid.as_str().to_string()),
    );

    let updated = inject_field(source, IDENTIFIER_FIELD, mfid.as_str());
    write_in_place(path, &updated).map_err(|message| CrucibleError::IdentifierWrite {
        path: path.to_path_buf(),
        mfid: mfid.as_str().to_string(),
        message,
    })?;
    tracing::info!("updated {} with mfid: {mfid}", path.display());

    Ok(IdentifierResolution {
        mfid,
        injected: true,
    })
}

pub(crate) fn existing_identifier(frontmatter: &Frontmatter) -> Option<Mfid> {
    match frontmatter.get(IDENTIFIER_FIELD)? {
        Value::String(text) => Mfid::from_document(text),
        Value::Number(number) => Mfid::from_document(&number.to_string()),
        _ => None,
    }
}

fn write_in_place(path: &Path, content: &str) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "document has no parent directory".to_string())?;
    let mut temp = tempfile::Builder::new()
        .prefix(".crucible-note")
        .tempfile_in(parent)
        .map_err(|err| err.to_string())?;
    temp.write_all(content.as_bytes())
        .map_err(|err| err.to_string())?;
    if let Ok(metadata) = fs::metadata(path) {
        let _ = fs::set_permissions(temp.path(), metadata.permissions());
    }
    temp.persist(path).map_err(|err| err.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::parsers::frontmatter::{FrontmatterStyle, parse_frontmatter};

    #[test]
    fn existing_identifier_is_reused_without_writing() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("note.md");
        let text = "---\nmfid: 0tcbwt4cp9x1z000bazhkv5gkg\n---\nbody";
        fs::write(&path, text).unwrap();

        let (mut map, _) = parse_frontmatter(text, FrontmatterStyle::Yaml);
        let resolution = ensure_identifier(&mut map, &path, text).unwrap();
        assert!(!resolution.injected);
        assert_eq!(resolution.mfid.as_str(), "0tcbwt4cp9x1z000bazhkv5gkg");
        assert_eq!(fs::read_to_string(&path).unwrap(), text);
    }

    #[test]
    fn unusual_identifier_is_kept_as_written() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("note.md");
        let text = "---\nmfid: run 42\n---\nbody";
        fs::write(&path, text).unwrap();

        let (mut map, _) = parse_frontmatter(text, FrontmatterStyle::Yaml);
        let resolution = ensure_identifier(&mut map, &path, text).unwrap();
        assert!(!resolution.injected);
        assert_eq!(resolution.mfid.as_str(), "run 42");
        assert_eq!(fs::read_to_string(&path).unwrap(), text);
    }

    #[test]
    fn missing_identifier_is_generated_and_persisted() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("note.md");
        let text = "---\ntitle: x\nmfid:\n---\n# Body\n";
        fs::write(&path, text).unwrap();

        let (mut map, _) = parse_frontmatter(text, FrontmatterStyle::Yaml);
        let first = ensure_identifier(&mut map, &path, text).unwrap();
        assert!(first.injected);
        assert_eq!(map[IDENTIFIER_FIELD], json!(first.mfid.as_str()));

        let rewritten = fs::read_to_string(&path).unwrap();
        assert_eq!(
            rewritten,
            format!("---\ntitle: x\nmfid: {}\n---\n# Body\n", first.mfid)
        );

        let (mut again, _) = parse_frontmatter(&rewritten, FrontmatterStyle::Yaml);
        let second = ensure_identifier(&mut again, &path, &rewritten).unwrap();
        assert!(!second.injected);
        assert_eq!(second.mfid, first.mfid);
    }

    #[test]
    fn write_failure_still_yields_identifier() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("missing-dir").join("note.md");
        let mut map = Frontmatter::new();

        let err = ensure_identifier(&mut map, &path, "body").unwrap_err();
        assert_matches!(err, CrucibleError::IdentifierWrite { ref mfid, .. } if mfid.len() == 26);
        assert!(map.contains_key(IDENTIFIER_FIELD));
    }
}
