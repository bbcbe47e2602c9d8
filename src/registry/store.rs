//! Registry file format.
//!
//! Line-delimited JSON: a header line naming the format and version, then
//! one [`JobRecord`] per line. The file is always read and written whole.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FarmError, Result};
use crate::registry::job::JobRecord;

pub const FORMAT_NAME: &str = "farm-dispatch-registry";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format: String,
    version: u32,
}

/// Read the registry file, failing on any format problem.
pub fn read(path: &Path) -> Result<BTreeMap<String, JobRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header: Header = match lines.next() {
        Some(line) => serde_json::from_str(&line?)?,
        None => return Err(FarmError::RegistryFormat("empty file".to_string())),
    };
    if header.format != FORMAT_NAME || header.version != FORMAT_VERSION {
        return Err(FarmError::RegistryFormat(format!(
            "unsupported header {} v{}",
            header.format, header.version
        )));
    }

    let mut jobs = BTreeMap::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: JobRecord = serde_json::from_str(&line)?;
        jobs.insert(record.id.clone(), record);
    }
    Ok(jobs)
}

/// Load the registry, degrading to empty when the file is missing or
/// unreadable.
pub fn load(path: &Path) -> BTreeMap<String, JobRecord> {
    if !path.exists() {
        return BTreeMap::new();
    }
    match read(path) {
        Ok(jobs) => {
            tracing::debug!(path = %path.display(), jobs = jobs.len(), "Registry loaded");
            jobs
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Registry unreadable, starting empty"
            );
            BTreeMap::new()
        }
    }
}

/// Overwrite the registry file. Writes a sibling temp file first and renames
/// it into place.
pub fn save(path: &Path, jobs: &BTreeMap<String, JobRecord>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let header = Header {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION,
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;
        for record in jobs.values() {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
