//! Coverage stats persistence
//!
//! A single versioned JSON file written atomically. Loading merges into
//! in-memory data by summing hit counts and OR-ing the verified flag, so
//! repeated runs accumulate. Corrupt files are reported once and ignored.

use crate::error::Result;
use crate::fsys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const STATS_VERSION: u32 = 1;

/// Per-line datum as persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStat {
    pub hits: u64,
    pub verified: bool,
}

/// Map of line number to datum for one source file
pub type FileLines = BTreeMap<u32, LineStat>;

/// On-disk stats document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsFile {
    pub version: u32,
    /// RFC 3339 write timestamp
    pub generated_at: String,
    pub files: BTreeMap<String, FileLines>,
}

impl StatsFile {
    pub fn from_data(files: BTreeMap<String, FileLines>) -> Self {
        Self {
            version: STATS_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            files,
        }
    }
}

/// Load a stats file. Missing, corrupt, or version-mismatched files yield
/// `None`; corruption is warned once per call site.
pub fn load(path: &Path) -> Option<StatsFile> {
    if !path.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("warning: could not read stats file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<StatsFile>(&content) {
        Ok(stats) if stats.version == STATS_VERSION => Some(stats),
        Ok(stats) => {
            eprintln!(
                "warning: stats file {} has version {} (expected {}), starting fresh",
                path.display(),
                stats.version,
                STATS_VERSION
            );
            None
        }
        Err(e) => {
            eprintln!(
                "warning: corrupt stats file {} ({}), starting fresh",
                path.display(),
                e
            );
            None
        }
    }
}

/// Atomic write (sibling temp + rename)
pub fn save(path: &Path, stats: &StatsFile) -> Result<()> {
    let content = serde_json::to_string_pretty(stats)
        .map_err(|e| crate::error::VouchError::io(format!("serialize stats: {}", e)))?;
    fsys::write_file(path, &content)
}

/// Merge `src` into `dst`: hit counts sum, verified OR-s
pub fn merge_into(dst: &mut BTreeMap<String, FileLines>, src: BTreeMap<String, FileLines>) {
    for (file, lines) in src {
        let entry = dst.entry(file).or_default();
        for (line, stat) in lines {
            let datum = entry.entry(line).or_default();
            datum.hits += stat.hits;
            datum.verified |= stat.verified;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> BTreeMap<String, FileLines> {
        let mut lines = FileLines::new();
        lines.insert(
            1,
            LineStat {
                hits: 3,
                verified: true,
            },
        );
        lines.insert(
            2,
            LineStat {
                hits: 1,
                verified: false,
            },
        );
        let mut files = BTreeMap::new();
        files.insert("/src/calc.lua".to_string(), lines);
        files
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        save(&path, &StatsFile::from_data(sample())).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.version, STATS_VERSION);
        let lines = loaded.files.get("/src/calc.lua").unwrap();
        assert_eq!(lines.get(&1).unwrap().hits, 3);
        assert!(lines.get(&1).unwrap().verified);
        assert!(!lines.get(&2).unwrap().verified);
    }

    #[test]
    fn test_load_missing_is_none() {
        assert!(load(Path::new("/no/such/stats.json")).is_none());
    }

    #[test]
    fn test_load_corrupt_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn test_load_version_mismatch_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(
            &path,
            r#"{"version": 999, "generated_at": "", "files": {}}"#,
        )
        .unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn test_merge_sums_hits_and_ors_verified() {
        let mut dst = sample();
        let mut src_lines = FileLines::new();
        src_lines.insert(
            1,
            LineStat {
                hits: 2,
                verified: false,
            },
        );
        src_lines.insert(
            2,
            LineStat {
                hits: 4,
                verified: true,
            },
        );
        src_lines.insert(
            9,
            LineStat {
                hits: 1,
                verified: false,
            },
        );
        let mut src = BTreeMap::new();
        src.insert("/src/calc.lua".to_string(), src_lines);

        merge_into(&mut dst, src);
        let lines = dst.get("/src/calc.lua").unwrap();
        assert_eq!(lines.get(&1).unwrap().hits, 5);
        assert!(lines.get(&1).unwrap().verified, "verified survives merge");
        assert_eq!(lines.get(&2).unwrap().hits, 5);
        assert!(lines.get(&2).unwrap().verified, "verified ORs in");
        assert_eq!(lines.get(&9).unwrap().hits, 1);
    }

    #[test]
    fn test_merge_new_file() {
        let mut dst = sample();
        let mut src = BTreeMap::new();
        let mut lines = FileLines::new();
        lines.insert(
            7,
            LineStat {
                hits: 1,
                verified: false,
            },
        );
        src.insert("/src/other.lua".to_string(), lines);
        merge_into(&mut dst, src);
        assert_eq!(dst.len(), 2);
    }
}
