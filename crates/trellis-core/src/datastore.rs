use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::event::Event;
use crate::filter::ScopeDirectory;

/// Read-only view over a data directory of event exports.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub events_json_path: PathBuf,
    pub events_data_path: PathBuf,
    pub scope_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        if data_dir.exists() && !data_dir.is_dir() {
            anyhow::bail!("{} is not a directory", data_dir.display());
        }

        let events_json_path = data_dir.join("events.json");
        let events_data_path = data_dir.join("events.data");
        let scope_path = data_dir.join("scope.json");

        info!(
            data_dir = %data_dir.display(),
            events_json = events_json_path.exists(),
            events_data = events_data_path.exists(),
            scope = scope_path.exists(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            events_json_path,
            events_data_path,
            scope_path,
        })
    }

    /// Loads `events.json`, falling back to `events.data`. Neither
    /// present means no events.
    #[tracing::instrument(skip(self))]
    pub fn load_events(&self) -> anyhow::Result<Vec<Event>> {
        if self.events_json_path.exists() {
            return load_json_array(&self.events_json_path).context("failed to load events.json");
        }
        if self.events_data_path.exists() {
            return load_jsonl(&self.events_data_path).context("failed to load events.data");
        }
        debug!(data_dir = %self.data_dir.display(), "no event files found");
        Ok(Vec::new())
    }

    #[tracing::instrument(skip(self))]
    pub fn load_directory(&self) -> anyhow::Result<ScopeDirectory> {
        if !self.scope_path.exists() {
            debug!("no scope.json, scope filter resolves nothing");
            return Ok(ScopeDirectory::default());
        }
        let raw = fs::read_to_string(&self.scope_path)
            .with_context(|| format!("failed reading {}", self.scope_path.display()))?;
        let directory: ScopeDirectory = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.scope_path.display()))?;
        debug!(
            tasks = directory.task_boards.len(),
            projects = directory.project_brands.len(),
            clients = directory.client_brands.len(),
            "loaded scope directory"
        );
        Ok(directory)
    }
}

/// Loads an explicit events file, either a JSON array or JSON lines.
#[tracing::instrument]
pub fn load_events_file(path: &Path) -> anyhow::Result<Vec<Event>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim_start().starts_with('[') {
        load_json_array(path)
    } else {
        load_jsonl(path)
    }
}

#[tracing::instrument(skip(path))]
fn load_json_array(path: &Path) -> anyhow::Result<Vec<Event>> {
    debug!(file = %path.display(), "loading json array");
    let file = fs::File::open(path)?;
    let events: Vec<Event> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed parsing {}", path.display()))?;
    debug!(count = events.len(), "loaded events from json array");
    Ok(events)
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Event>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: Event = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(event);
    }

    debug!(count = out.len(), "loaded events from jsonl");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn missing_files_mean_empty_inputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open store");

        assert!(store.load_events().expect("load events").is_empty());
        assert_eq!(
            store.load_directory().expect("load directory"),
            ScopeDirectory::default()
        );
    }

    #[test]
    fn prefers_json_array_over_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("events.json"),
            r#"[{"id": "a", "type": "task", "startDate": "2026-02-17", "endDate": "2026-02-17"}]"#,
        )
        .expect("write events.json");
        fs::write(
            dir.path().join("events.data"),
            "{\"id\": \"b\", \"type\": \"invoice\"}\n",
        )
        .expect("write events.data");

        let store = DataStore::open(dir.path()).expect("open store");
        let events = store.load_events().expect("load events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "a");
    }

    #[test]
    fn reads_json_lines_skipping_blanks() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("events.data"),
            "{\"id\": \"a\", \"type\": \"estimate\", \"sourceId\": \"est-1\"}\n\n   \n{\"id\": \"b\", \"type\": \"comment\", \"startDate\": 1771318800000}\n",
        )
        .expect("write events.data");

        let store = DataStore::open(dir.path()).expect("open store");
        let events = store.load_events().expect("load events");
        let kinds = events.iter().map(Event::kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![EventKind::Estimate, EventKind::Comment]);
    }

    #[test]
    fn malformed_line_reports_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.data");
        fs::write(&path, "{\"id\": \"a\", \"type\": \"task\"}\n{not json}\n").expect("write");

        let err = load_events_file(&path).expect_err("malformed line");
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn loads_scope_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("scope.json"),
            r#"{"tasks": {"t1": "b1"}, "boards": {"b1": "p1"}, "projects": {"p1": "acme"}}"#,
        )
        .expect("write scope.json");

        let store = DataStore::open(dir.path()).expect("open store");
        let directory = store.load_directory().expect("load directory");
        assert_eq!(directory.task_boards.get("t1").map(String::as_str), Some("b1"));
        assert_eq!(directory.project_brands.get("p1").map(String::as_str), Some("acme"));
        assert!(directory.client_brands.is_empty());
    }
}
