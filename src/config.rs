//! Session configuration.
//!
//! A flat options struct loaded from a YAML file via `yaml-rust`, with
//! documented defaults for everything optional. The file is `.nvc.yml`
//! and the options are the ones the thin CLI driver needs to build a
//! [`Session`](crate::Session): std revision, top unit, search path,
//! assertion severity floor, waveform sink path.

use std::fmt;
use std::fs::File;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use yaml_rust::{ScanError, YamlLoader};

use crate::diagnostics::Severity;

pub const DEFAULT_LIBRARY_DIR: &str = ".nvc";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StdRevision {
    Vhdl1993,
    Vhdl2002,
    Vhdl2008,
    Vhdl2019,
}

impl Default for StdRevision {
    fn default() -> Self {
        StdRevision::Vhdl2008
    }
}

impl StdRevision {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "1993" => Some(StdRevision::Vhdl1993),
            "2002" => Some(StdRevision::Vhdl2002),
            "2008" => Some(StdRevision::Vhdl2008),
            "2019" => Some(StdRevision::Vhdl2019),
            _ => None,
        }
    }
}

/// Everything the driver needs to run `analyse`/`elaborate`/`run`, whether
/// it came from `.nvc.yml` or from `clap` matches.
#[derive(Clone, Debug)]
pub struct Options {
    pub std: StdRevision,
    pub top_unit: Option<String>,
    pub library_dir: PathBuf,
    pub assertion_floor: Severity,
    pub wave_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            std: StdRevision::default(),
            top_unit: None,
            library_dir: PathBuf::from(DEFAULT_LIBRARY_DIR),
            assertion_floor: Severity::Error,
            wave_path: None,
        }
    }
}

#[derive(Debug)]
pub enum LoadConfigError {
    Io(io::Error),
    Yaml(ScanError),
    Invalid(String),
    NotFound,
}

impl fmt::Display for LoadConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadConfigError::Io(err) => write!(f, "{}", err),
            LoadConfigError::Yaml(err) => write!(f, "invalid configuration syntax: {}", err),
            LoadConfigError::Invalid(msg) => write!(f, "invalid configuration format: {}", msg),
            LoadConfigError::NotFound => write!(f, "configuration not found"),
        }
    }
}

impl std::error::Error for LoadConfigError {}

impl Options {
    /// Loads `.nvc.yml` relative to `filepath`'s directory, falling back to
    /// every documented default for anything the file omits.
    pub fn load_from_file<P: AsRef<Path>>(filepath: P) -> Result<Self, LoadConfigError> {
        let mut file = File::open(&filepath).map_err(LoadConfigError::Io)?;
        let mut content = String::new();
        file.read_to_string(&mut content).map_err(LoadConfigError::Io)?;

        let yaml = YamlLoader::load_from_str(&content).map_err(LoadConfigError::Yaml)?;
        let doc = yaml
            .get(0)
            .ok_or_else(|| LoadConfigError::Invalid("empty file".to_string()))?;
        let hash = doc
            .as_hash()
            .ok_or_else(|| LoadConfigError::Invalid("top level must be a mapping".to_string()))?;

        let mut options = Options::default();
        let base_dir = filepath.as_ref().parent().map(Path::to_path_buf).unwrap_or_default();

        for (key, value) in hash {
            let key = key
                .as_str()
                .ok_or_else(|| LoadConfigError::Invalid("keys must be strings".to_string()))?;
            match key {
                "std" => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| LoadConfigError::Invalid("'std' must be a string".to_string()))?;
                    options.std = StdRevision::parse(text)
                        .ok_or_else(|| LoadConfigError::Invalid(format!("unknown std revision '{}'", text)))?;
                }
                "top_unit" => {
                    options.top_unit = Some(
                        value
                            .as_str()
                            .ok_or_else(|| LoadConfigError::Invalid("'top_unit' must be a string".to_string()))?
                            .to_string(),
                    );
                }
                "library_dir" => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| LoadConfigError::Invalid("'library_dir' must be a string".to_string()))?;
                    options.library_dir = base_dir.join(text);
                }
                "assertion_floor" => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| LoadConfigError::Invalid("'assertion_floor' must be a string".to_string()))?;
                    options.assertion_floor = match text {
                        "note" => Severity::Note,
                        "warning" => Severity::Warning,
                        "error" => Severity::Error,
                        "fatal" => Severity::Fatal,
                        other => {
                            return Err(LoadConfigError::Invalid(format!("unknown severity '{}'", other)))
                        }
                    };
                }
                "wave" => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| LoadConfigError::Invalid("'wave' must be a string".to_string()))?;
                    options.wave_path = Some(base_dir.join(text));
                }
                other => return Err(LoadConfigError::Invalid(format!("unknown option '{}'", other))),
            }
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_the_file_is_empty() {
        let dir = std::env::temp_dir().join("nvc_core_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".nvc.yml");
        std::fs::write(&path, "{}\n").unwrap();

        let options = Options::load_from_file(&path).unwrap();
        assert_eq!(options.std, StdRevision::Vhdl2008);
        assert_eq!(options.assertion_floor, Severity::Error);
        assert!(options.top_unit.is_none());
    }

    #[test]
    fn overrides_every_documented_field() {
        let dir = std::env::temp_dir().join("nvc_core_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".nvc.yml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "std: \"1993\"\ntop_unit: counter_tb\nlibrary_dir: libs\nassertion_floor: warning\nwave: dump.vcd\n"
        )
        .unwrap();
        drop(file);

        let options = Options::load_from_file(&path).unwrap();
        assert_eq!(options.std, StdRevision::Vhdl1993);
        assert_eq!(options.top_unit.as_deref(), Some("counter_tb"));
        assert_eq!(options.assertion_floor, Severity::Warning);
        assert_eq!(options.library_dir, dir.join("libs"));
        assert_eq!(options.wave_path, Some(dir.join("dump.vcd")));
    }

    #[test]
    fn rejects_an_unknown_option() {
        let dir = std::env::temp_dir().join("nvc_core_config_test_bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".nvc.yml");
        std::fs::write(&path, "bogus: 1\n").unwrap();

        let err = Options::load_from_file(&path).unwrap_err();
        assert!(matches!(err, LoadConfigError::Invalid(_)));
    }
}
