use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mrq_core::types::ProgressState;

/// The ingest progress artifact: a JSON file mapping
/// `symbol -> ProgressState`, written atomically after every completed
/// chunk. A corrupt file is treated as empty rather than a fatal error.
pub struct IngestProgressFile {
    path: PathBuf,
}

impl IngestProgressFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> HashMap<String, ProgressState> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return HashMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    /// Writes the whole map atomically: write to a sibling temp file, then
    /// rename over the destination so a crash mid-write never corrupts the
    /// previous snapshot.
    pub fn save(&self, state: &HashMap<String, ProgressState>) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(state)?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Resume start time for a symbol: the later of the requested start and
    /// the last completed chunk's end time.
    pub fn resume_start(&self, symbol: &str, requested_start: DateTime<Utc>) -> DateTime<Utc> {
        self.load()
            .get(symbol)
            .and_then(|p| p.last_completed_time)
            .map(|t| t.max(requested_start))
            .unwrap_or(requested_start)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrq_core::types::ProgressState;

    #[test]
    fn round_trips_progress_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let file = IngestProgressFile::new(&path);

        let mut state = HashMap::new();
        let mut p = ProgressState::new("BTCUSDT", 10, Utc::now());
        p.completed_chunks = 3;
        p.last_completed_time = Some(Utc::now());
        state.insert("BTCUSDT".to_string(), p.clone());

        file.save(&state).unwrap();
        let loaded = file.load();
        assert_eq!(loaded["BTCUSDT"].completed_chunks, 3);
    }

    #[test]
    fn missing_file_is_treated_as_empty() {
        let file = IngestProgressFile::new("/nonexistent/path/progress.json");
        assert!(file.load().is_empty());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not valid json").unwrap();
        let file = IngestProgressFile::new(&path);
        assert!(file.load().is_empty());
    }

    #[test]
    fn resume_start_picks_later_of_requested_and_last_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let file = IngestProgressFile::new(&path);

        let requested = Utc::now();
        let mut state = HashMap::new();
        let mut p = ProgressState::new("BTCUSDT", 10, requested);
        p.last_completed_time = Some(requested + chrono::Duration::days(5));
        state.insert("BTCUSDT".to_string(), p);
        file.save(&state).unwrap();

        let resumed = file.resume_start("BTCUSDT", requested);
        assert_eq!(resumed, requested + chrono::Duration::days(5));

        let no_progress = file.resume_start("ETHUSDT", requested);
        assert_eq!(no_progress, requested);
    }
}
