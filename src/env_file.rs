//! `.env.example` parsing and `.env` writing.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const EXAMPLE_FILE: &str = ".env.example";
pub const ENV_FILE: &str = ".env";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub default: String,
}

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("invalid line {line}: expected KEY=value")]
    InvalidLine { line: usize },

    #[error("invalid line {line}: empty key")]
    EmptyKey { line: usize },

    #[error("empty value for key {key}")]
    EmptyValue { key: String },

    #[error("empty default value for key {key}")]
    EmptyDefault { key: String },

    #[error("{} has no entries", .path.display())]
    NoEntries { path: PathBuf },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EnvFileError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Parse `KEY=value` lines, skipping blanks and `#` comments. Entries come back sorted by key.
pub fn parse_example<R: BufRead>(reader: R) -> Result<Vec<EnvEntry>, EnvFileError> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_num = idx + 1;
        let line = line.map_err(|e| EnvFileError::io("scan", Path::new(EXAMPLE_FILE), e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or(EnvFileError::InvalidLine { line: line_num })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(EnvFileError::EmptyKey { line: line_num });
        }
        entries.push(EnvEntry {
            key: key.to_string(),
            default: value.trim().to_string(),
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

/// Read and parse `<dir>/.env.example`.
pub fn read_example(dir: &Path) -> Result<Vec<EnvEntry>, EnvFileError> {
    let path = dir.join(EXAMPLE_FILE);
    let file = fs::File::open(&path).map_err(|e| EnvFileError::io("open", &path, e))?;
    let entries = parse_example(BufReader::new(file))?;
    if entries.is_empty() {
        return Err(EnvFileError::NoEntries { path });
    }
    Ok(entries)
}

/// Write `KEY=value` lines sorted by key. Empty values are rejected before anything is written.
pub fn write_env_file(path: &Path, values: &BTreeMap<String, String>) -> Result<(), EnvFileError> {
    let mut out = String::with_capacity(values.len() * 16);
    for (key, value) in values {
        if value.is_empty() {
            return Err(EnvFileError::EmptyValue { key: key.clone() });
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out).map_err(|e| EnvFileError::io("write", path, e))?;
    restrict_permissions(path)?;
    tracing::info!(path = %path.display(), keys = values.len(), "env file written");
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), EnvFileError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| EnvFileError::io("set permissions on", path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), EnvFileError> {
    Ok(())
}

/// Create `<dir>/.env` from the example's defaults. Every key needs a non-empty default.
pub fn create_with_defaults(dir: &Path) -> Result<PathBuf, EnvFileError> {
    let entries = read_example(dir)?;
    let mut values = BTreeMap::new();
    for entry in entries {
        if entry.default.is_empty() {
            return Err(EnvFileError::EmptyDefault { key: entry.key });
        }
        values.insert(entry.key, entry.default);
    }
    let path = dir.join(ENV_FILE);
    write_env_file(&path, &values)?;
    Ok(path)
}

pub fn env_file_exists(dir: &Path) -> bool {
    dir.join(ENV_FILE).exists()
}
