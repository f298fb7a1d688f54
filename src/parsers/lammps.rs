//! LAMMPS simulation inputs: the input script, its data file and log.

use std::collections::HashMap;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::CrucibleError;
use crate::parsers::{Extraction, MetadataExtractor, absolute};

pub const MEASUREMENT: &str = "LAMMPS";
pub const DEFAULT_LOG: &str = "log.lammps";

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_])").unwrap());

/// Standard atomic masses used to name atom types without a comment.
const STANDARD_MASSES: &[(&str, f64)] = &[
    ("H", 1.008),
    ("He", 4.0026),
    ("Li", 6.94),
    ("Be", 9.0122),
    ("B", 10.81),
    ("C", 12.011),
    ("N", 14.007),
    ("O", 15.999),
    ("F", 18.998),
    ("Ne", 20.180),
    ("Na", 22.990),
    ("Mg", 24.305),
    ("Al", 26.982),
    ("Si", 28.085),
    ("P", 30.974),
    ("S", 32.06),
    ("Cl", 35.45),
    ("Ar", 39.948),
    ("K", 39.098),
    ("Ca", 40.078),
    ("Ti", 47.867),
    ("V", 50.942),
    ("Cr", 51.996),
    ("Mn", 54.938),
    ("Fe", 55.845),
    ("Co", 58.933),
    ("Ni", 58.693),
    ("Cu", 63.546),
    ("Zn", 65.38),
    ("Ga", 69.723),
    ("Ge", 72.630),
    ("Br", 79.904),
    ("Zr", 91.224),
    ("Mo", 95.95),
    ("Ag", 107.87),
    ("Sn", 118.71),
    ("I", 126.90),
    ("W", 183.84),
    ("Pt", 195.08),
    ("Au", 196.97),
    ("Pb", 207.2),
];
const MASS_TOLERANCE: f64 = 0.5;

/// Files referenced from an input script.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputScript {
    pub data_file: Option<String>,
    pub restart_file: Option<String>,
    pub dump_files: Vec<String>,
    pub log_files: Vec<String>,
}

pub fn parse_input_script(text: &str) -> InputScript {
    let mut script = InputScript::default();
    let mut variables: HashMap<String, String> = HashMap::new();

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["read_data", file, ..] => script.data_file = Some(substitute(file, &variables)),
            ["read_restart", file, ..] => script.restart_file = Some(substitute(file, &variables)),
            ["variable", name, _style, value, ..] => {
                variables.insert(name.to_string(), substitute(value, &variables));
            }
            ["dump", _, _, _, _, file, ..] => script.dump_files.push(substitute(file, &variables)),
            ["log", file, ..] => script.log_files.push(substitute(file, &variables)),
            _ => {}
        }
    }

    if script.log_files.is_empty() {
        script.log_files.push(DEFAULT_LOG.to_string());
    }
    script
}

/// Expands `${name}` and `$x` references; unknown names are left as written.
fn substitute(token: &str, variables: &HashMap<String, String>) -> String {
    VARIABLE
        .replace_all(token, |captures: &Captures| {
            let name = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|name| name.as_str())
                .unwrap_or_default();
            variables
                .get(name)
                .cloned()
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataSummary {
    pub natoms: Option<u64>,
    pub atom_types: Option<u64>,
    pub volume: Option<f64>,
    pub elements: Vec<String>,
}

/// Reads the header counts, box bounds and `Masses` section of a data file.
pub fn parse_data_file(text: &str) -> DataSummary {
    let mut summary = DataSummary::default();
    let mut lengths = [None::<f64>; 3];
    let mut lines = text.lines().skip(1).peekable();

    while let Some(raw) = lines.next() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [count, "atoms"] => summary.natoms = count.parse().ok(),
            [count, "atom", "types"] => summary.atom_types = count.parse().ok(),
            [lo, hi, axis_lo, _] if axis_lo.ends_with("lo") => {
                let index = match *axis_lo {
                    "xlo" => 0,
                    "ylo" => 1,
                    "zlo" => 2,
                    _ => continue,
                };
                if let (Ok(lo), Ok(hi)) = (lo.parse::<f64>(), hi.parse::<f64>()) {
                    lengths[index] = Some(hi - lo);
                }
            }
            ["Masses"] => summary.elements = read_masses(&mut lines),
            ["Atoms", ..] | ["Velocities", ..] => break,
            _ => {}
        }
    }

    if let [Some(x), Some(y), Some(z)] = lengths {
        summary.volume = Some(x * y * z);
    }
    summary
}

fn read_masses<'a>(lines: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>) -> Vec<String> {
    let mut elements: Vec<String> = Vec::new();
    let mut started = false;
    while let Some(&raw) = lines.peek() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            if started {
                break;
            }
            lines.next();
            continue;
        }
        let (values, comment) = match trimmed.split_once('#') {
            Some((values, comment)) => (values, Some(comment.trim())),
            None => (trimmed, None),
        };
        let mut tokens = values.split_whitespace();
        let (Some(_type_id), Some(mass)) = (tokens.next(), tokens.next()) else {
            break;
        };
        let Ok(mass) = mass.parse::<f64>() else {
            break;
        };
        started = true;
        lines.next();

        let element = comment
            .and_then(|comment| comment.split_whitespace().next())
            .and_then(known_symbol)
            .or_else(|| element_for_mass(mass));
        match element {
            Some(symbol) if !elements.iter().any(|known| known == symbol) => {
                elements.push(symbol.to_string());
            }
            Some(_) => {}
            None => tracing::debug!("no element matches mass {mass}"),
        }
    }
    elements
}

fn known_symbol(candidate: &str) -> Option<&'static str> {
    STANDARD_MASSES
        .iter()
        .find(|(symbol, _)| *symbol == candidate)
        .map(|(symbol, _)| *symbol)
}

/// Element whose standard mass is nearest to `mass`, within half a dalton.
pub fn element_for_mass(mass: f64) -> Option<&'static str> {
    STANDARD_MASSES
        .iter()
        .map(|(symbol, standard)| (*symbol, (standard - mass).abs()))
        .filter(|(_, distance)| *distance <= MASS_TOLERANCE)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(symbol, _)| symbol)
}

/// First file is the input script; any further files are uploaded as given.
pub struct LammpsExtractor;

impl MetadataExtractor for LammpsExtractor {
    fn extract(&self, inputs: &[Utf8PathBuf]) -> Result<Extraction, CrucibleError> {
        let (input, extra) = inputs
            .split_first()
            .ok_or_else(|| CrucibleError::Lammps("no input script provided".to_string()))?;
        let input = absolute(input)?;
        let root = input.parent().unwrap_or(Utf8Path::new(".")).to_path_buf();
        let text = fs::read_to_string(input.as_std_path())
            .map_err(|err| CrucibleError::Lammps(format!("read {input}: {err}")))?;
        let script = parse_input_script(&text);

        let mut warnings = Vec::new();
        let mut files = vec![input.clone()];
        let mut metadata = Map::new();
        metadata.insert("root".to_string(), json!(root));
        metadata.insert(
            "input_file".to_string(),
            json!(input.file_name().unwrap_or_default()),
        );
        metadata.insert("dump_files".to_string(), json!(script.dump_files));
        metadata.insert("log_files".to_string(), json!(script.log_files));

        let mut elements = Vec::new();
        if let Some(data_file) = &script.data_file {
            let path = referenced_file(&root, data_file)?;
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| CrucibleError::Lammps(format!("read {path}: {err}")))?;
            let summary = parse_data_file(&content);
            metadata.insert("data_file".to_string(), json!(data_file));
            metadata.insert("natoms".to_string(), json!(summary.natoms));
            metadata.insert("atom_types".to_string(), json!(summary.atom_types));
            metadata.insert("volume".to_string(), json!(summary.volume));
            metadata.insert("elements".to_string(), json!(summary.elements));
            elements = summary.elements;
            files.push(path);
        } else if let Some(restart_file) = &script.restart_file {
            let path = referenced_file(&root, restart_file)?;
            tracing::info!("using binary restart file {path}; no structure metadata");
            metadata.insert("restart_file".to_string(), json!(restart_file));
            metadata.insert("restart_file_used".to_string(), Value::Bool(true));
            files.push(path);
        } else {
            let warning = format!("no read_data or read_restart command in {input}");
            tracing::warn!("{warning}");
            warnings.push(warning);
        }

        if let Some(log) = script.log_files.first() {
            let path = root.join(log);
            match fs::read_to_string(path.as_std_path()) {
                Ok(content) => {
                    let version = content.lines().next().unwrap_or_default().trim();
                    metadata.insert("lammps_version".to_string(), json!(version));
                }
                Err(_) => {
                    let warning = format!("log file not found: {path}");
                    tracing::warn!("{warning}");
                    warnings.push(warning);
                }
            }
        }

        for path in extra {
            files.push(absolute(path)?);
        }
        if !extra.is_empty() {
            tracing::info!("including {} additional file(s)", extra.len());
        }

        let mut keywords = vec![MEASUREMENT.to_string(), "molecular dynamics".to_string()];
        keywords.extend(elements);

        Ok(Extraction {
            files,
            metadata,
            keywords,
            references: Vec::new(),
            mfid: None,
            title: None,
            measurement: Some(MEASUREMENT.to_string()),
            data_format: Some(MEASUREMENT.to_string()),
            warnings,
        })
    }
}

fn referenced_file(root: &Utf8Path, name: &str) -> Result<Utf8PathBuf, CrucibleError> {
    let path = root.join(name);
    if !path.as_std_path().is_file() {
        return Err(CrucibleError::Lammps(format!(
            "referenced file not found: {path}"
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const DATA: &str = "LAMMPS data file\n\n  4 atoms\n  2 atom types\n\n  0.0 10.0 xlo xhi\n  -1.0 1.0 ylo yhi\n  0.0 5.0 zlo zhi\n\nMasses\n\n1 15.999 # O\n2 1.008\n\nAtoms # full\n\n1 1 1 0.0 0.0 0.0 0.0\n";

    #[test]
    fn input_script_files_and_variables() {
        let script = parse_input_script(
            "variable T equal 300\nvariable name string run\n  read_data system.data # comment\n\
             dump d1 all custom 100 traj_${T}.lammpstrj id x y z\nlog log_${name}_$T.txt\n",
        );
        assert_eq!(script.data_file.as_deref(), Some("system.data"));
        assert_eq!(script.dump_files, vec!["traj_300.lammpstrj"]);
        assert_eq!(script.log_files, vec!["log_run_300.txt"]);
    }

    #[test]
    fn default_log_when_none_given() {
        let script = parse_input_script("read_restart state.restart\n");
        assert_eq!(script.restart_file.as_deref(), Some("state.restart"));
        assert_eq!(script.log_files, vec![DEFAULT_LOG]);
    }

    #[test]
    fn data_file_header_and_masses() {
        let summary = parse_data_file(DATA);
        assert_eq!(summary.natoms, Some(4));
        assert_eq!(summary.atom_types, Some(2));
        assert_eq!(summary.volume, Some(100.0));
        assert_eq!(summary.elements, vec!["O", "H"]);
    }

    #[test]
    fn masses_map_to_nearest_element() {
        assert_eq!(element_for_mass(63.55), Some("Cu"));
        assert_eq!(element_for_mass(12.0), Some("C"));
        assert_eq!(element_for_mass(500.0), None);
    }

    #[test]
    fn extract_collects_files_and_version() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().canonicalize().unwrap()).unwrap();
        fs::write(root.join("in.water"), "read_data water.data\nrun 100\n").unwrap();
        fs::write(root.join("water.data"), DATA).unwrap();
        fs::write(root.join("log.lammps"), "LAMMPS (2 Aug 2023)\nmore\n").unwrap();
        fs::write(root.join("notes.txt"), "x").unwrap();

        let extraction = LammpsExtractor
            .extract(&[root.join("in.water"), root.join("notes.txt")])
            .unwrap();
        assert_eq!(
            extraction.files,
            vec![root.join("in.water"), root.join("water.data"), root.join("notes.txt")]
        );
        assert_eq!(extraction.metadata["lammps_version"], json!("LAMMPS (2 Aug 2023)"));
        assert_eq!(extraction.metadata["natoms"], json!(4));
        assert_eq!(
            extraction.keywords,
            vec!["LAMMPS", "molecular dynamics", "O", "H"]
        );
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn missing_data_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::write(root.join("in.run"), "read_data gone.data\n").unwrap();
        let err = LammpsExtractor.extract(&[root.join("in.run")]).unwrap_err();
        assert_matches!(err, CrucibleError::Lammps(_));
    }
}
