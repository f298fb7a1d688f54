//! Format-specific metadata extraction ahead of an upload.
//!
//! A [`ParserKind`] tag maps to a [`MetadataExtractor`]; [`parse_inputs`] is
//! the fixed pipeline that validates inputs and runs the chosen extractor.

pub mod frontmatter;
pub mod identifier;
pub mod lammps;
pub mod markdown;
pub mod mdnote;

use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{Mfid, Reference};
use crate::error::CrucibleError;
use frontmatter::FrontmatterStyle;

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub frontmatter: FrontmatterStyle,
    /// Host of the archive web interface, used to recognise hyperlinks.
    pub web_host: Option<String>,
}

/// What an extractor learned about its inputs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub files: Vec<Utf8PathBuf>,
    pub metadata: Map<String, Value>,
    pub keywords: Vec<String>,
    pub references: Vec<Reference>,
    pub mfid: Option<Mfid>,
    pub title: Option<String>,
    pub measurement: Option<String>,
    pub data_format: Option<String>,
    pub warnings: Vec<String>,
}

pub trait MetadataExtractor {
    fn extract(&self, inputs: &[Utf8PathBuf]) -> Result<Extraction, CrucibleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Generic,
    MdNote,
    Lammps,
}

impl ParserKind {
    pub const ALL: [ParserKind; 3] = [ParserKind::Generic, ParserKind::MdNote, ParserKind::Lammps];

    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::Generic => "generic",
            ParserKind::MdNote => "mdnote",
            ParserKind::Lammps => "lammps",
        }
    }

    pub fn extractor(&self, options: &ParseOptions) -> Box<dyn MetadataExtractor> {
        match self {
            ParserKind::Generic => Box::new(GenericExtractor),
            ParserKind::MdNote => Box::new(mdnote::MdNoteExtractor::new(options.clone())),
            ParserKind::Lammps => Box::new(lammps::LammpsExtractor),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParserKind {
    type Err = CrucibleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generic" | "none" => Ok(ParserKind::Generic),
            "mdnote" | "markdown" | "md" | "note" => Ok(ParserKind::MdNote),
            "lammps" | "lmp" => Ok(ParserKind::Lammps),
            _ => Err(CrucibleError::UnsupportedFormat(value.to_string())),
        }
    }
}

/// Uploads the given files untouched.
pub struct GenericExtractor;

impl MetadataExtractor for GenericExtractor {
    fn extract(&self, inputs: &[Utf8PathBuf]) -> Result<Extraction, CrucibleError> {
        let files = inputs
            .iter()
            .map(|path| absolute(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Extraction {
            files,
            ..Extraction::default()
        })
    }
}

pub fn parse_inputs(
    kind: ParserKind,
    inputs: &[Utf8PathBuf],
    options: &ParseOptions,
) -> Result<Extraction, CrucibleError> {
    if inputs.is_empty() {
        return Err(CrucibleError::Metadata("no input files provided".to_string()));
    }
    if let Some(missing) = inputs.iter().find(|path| !path.as_std_path().is_file()) {
        return Err(CrucibleError::MissingInputFile(
            missing.as_std_path().to_path_buf(),
        ));
    }
    tracing::debug!("parsing {} input(s) as {kind}", inputs.len());
    kind.extractor(options).extract(inputs)
}

pub(crate) fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, CrucibleError> {
    let canonical = fs::canonicalize(path.as_std_path())
        .map_err(|_| CrucibleError::MissingInputFile(path.as_std_path().to_path_buf()))?;
    Utf8PathBuf::from_path_buf(canonical)
        .map_err(|path| CrucibleError::Filesystem(format!("non UTF-8 path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn registry_aliases() {
        assert_eq!("Markdown".parse::<ParserKind>().unwrap(), ParserKind::MdNote);
        assert_eq!("lmp".parse::<ParserKind>().unwrap(), ParserKind::Lammps);
        assert_eq!("none".parse::<ParserKind>().unwrap(), ParserKind::Generic);
        assert_matches!(
            "emd".parse::<ParserKind>(),
            Err(CrucibleError::UnsupportedFormat(_))
        );
    }

    #[test]
    fn missing_input_is_fatal() {
        let err = parse_inputs(
            ParserKind::Generic,
            &[Utf8PathBuf::from("/definitely/not/here.dat")],
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert_matches!(err, CrucibleError::MissingInputFile(_));
    }
}
