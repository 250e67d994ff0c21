//! Summary: JSON run reports written at the end of a phase sequence.
//! Copyright (c) YOAB. All rights reserved.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::info;

use crate::error::{Error, Result};

/// Serializes a `Duration` as whole milliseconds.
pub fn duration_ms<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Writes `report` as pretty-printed JSON, creating parent directories.
pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::Io {
            context: "creating report directory",
            source,
        })?;
    }
    let mut bytes = serde_json::to_vec_pretty(report)?;
    bytes.push(b'\n');
    fs::write(path, bytes).map_err(|source| Error::Io {
        context: "writing report",
        source,
    })?;
    info!(path = %path.display(), "report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: &'static str,
        #[serde(serialize_with = "duration_ms")]
        elapsed: Duration,
    }

    #[test]
    fn test_write_report_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.json");
        let sample = Sample {
            name: "index-lag",
            elapsed: Duration::from_millis(1500),
        };
        write_report(&path, &sample).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["name"], "index-lag");
        assert_eq!(value["elapsed"], 1500);
    }
}
