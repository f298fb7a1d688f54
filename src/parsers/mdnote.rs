use serde_json::{Map, Value, json};

use camino::Utf8PathBuf;

use crate::error::CrucibleError;
use crate::parsers::markdown::{Document, first_title, split_by_kind};
use crate::parsers::{Extraction, MetadataExtractor, ParseOptions, absolute};

pub const MEASUREMENT: &str = "MDNote";
const BASE_KEYWORDS: [&str; 3] = ["markdown", "note", "MDNote"];

/// Markdown notes with their locally linked images.
pub struct MdNoteExtractor {
    options: ParseOptions,
}

impl MdNoteExtractor {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }
}

impl MetadataExtractor for MdNoteExtractor {
    fn extract(&self, inputs: &[Utf8PathBuf]) -> Result<Extraction, CrucibleError> {
        let (note, extra) = inputs
            .split_first()
            .ok_or_else(|| CrucibleError::Metadata("no markdown file provided".to_string()))?;
        let mut document = Document::read(note, self.options.frontmatter)?;
        let mut warnings = Vec::new();

        let mfid = match document.resolve_identifier() {
            Ok(resolution) => resolution.mfid,
            Err(CrucibleError::IdentifierWrite {
                path,
                mfid,
                message,
            }) => {
                let warning = format!(
                    "could not persist mfid {mfid} to {}: {message}",
                    path.display()
                );
                tracing::warn!("{warning}");
                warnings.push(warning);
                mfid.parse()?
            }
            Err(err) => return Err(err),
        };

        let headings = document.headings();
        let title = first_title(&headings).map(str::to_string);

        let references = document.references(self.options.web_host.as_deref());
        let linked = split_by_kind(&references);

        let images = document.images();
        for image in images.iter().filter(|image| !image.exists) {
            warnings.push(format!("referenced image not found: {}", image.reference));
        }
        let local_images: Vec<Utf8PathBuf> = images
            .iter()
            .filter(|image| image.exists)
            .map(|image| image.path.clone())
            .collect();

        let mut files = vec![document.path().to_path_buf()];
        files.extend(local_images.iter().cloned());
        for path in extra {
            files.push(absolute(path)?);
        }

        let mut keywords: Vec<String> = BASE_KEYWORDS.iter().map(|kw| kw.to_string()).collect();
        keywords.extend(frontmatter_tags(document.frontmatter().get("tags")));

        let mut metadata = Map::new();
        metadata.insert("mfid".to_string(), json!(mfid.as_str()));
        metadata.insert(
            "markdown_file".to_string(),
            json!(document.path().file_name().unwrap_or_default()),
        );
        metadata.insert("title".to_string(), json!(title));
        metadata.insert("headings".to_string(), json!(headings));
        metadata.insert(
            "frontmatter".to_string(),
            Value::Object(document.frontmatter().clone()),
        );
        metadata.insert("num_images".to_string(), json!(local_images.len()));
        metadata.insert(
            "image_files".to_string(),
            json!(
                local_images
                    .iter()
                    .filter_map(|path| path.file_name())
                    .collect::<Vec<_>>()
            ),
        );
        metadata.insert("linked_datasets".to_string(), json!(linked.datasets));
        metadata.insert("linked_samples".to_string(), json!(linked.samples));

        Ok(Extraction {
            files,
            metadata,
            keywords,
            references,
            mfid: Some(mfid),
            title,
            measurement: Some(MEASUREMENT.to_string()),
            data_format: None,
            warnings,
        })
    }
}

/// `tags` as a list, or a string split on commas and whitespace.
fn frontmatter_tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|tag| !tag.is_empty())
            .collect(),
        Some(Value::String(text)) => text
            .split(|ch: char| ch == ',' || ch.is_whitespace())
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_from_list_or_string() {
        assert_eq!(
            frontmatter_tags(Some(&json!(["xrd", 7, null]))),
            vec!["xrd", "7"]
        );
        assert_eq!(
            frontmatter_tags(Some(&json!("xrd, thin-film  anneal"))),
            vec!["xrd", "thin-film", "anneal"]
        );
        assert!(frontmatter_tags(Some(&json!({"a": 1}))).is_empty());
        assert!(frontmatter_tags(None).is_empty());
    }
}
