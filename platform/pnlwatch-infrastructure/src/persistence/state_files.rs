use pnlwatch_domain::repositories::state_store::StateStore;
use pnlwatch_domain::value_objects::pnl_sample::PnlSample;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

const HISTORY_FILE_NAME: &str = "pnl_history.json";
const HOLD_FILE_NAME: &str = "hold_positions.json";

/// Stores the two state documents as pretty-printed JSON files under a
/// root directory. A missing or unparseable document loads as empty state;
/// only write failures surface as errors.
pub struct FilesystemStateStore {
    history_path: PathBuf,
    hold_path: PathBuf,
}

impl FilesystemStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, String> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|err| format!("failed to create state dir {}: {}", root.display(), err))?;
        Ok(Self {
            history_path: root.join(HISTORY_FILE_NAME),
            hold_path: root.join(HOLD_FILE_NAME),
        })
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn hold_path(&self) -> &Path {
        &self.hold_path
    }
}

fn record_write_metrics(kind: &'static str, start: Instant, result: &Result<(), String>) {
    let result_label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!(
        "pnlwatch.infra.state.write.calls_total",
        "kind" => kind,
        "result" => result_label
    )
    .increment(1);
    metrics::histogram!("pnlwatch.infra.state.write_ms", "kind" => kind, "result" => result_label)
        .record(start.elapsed().as_millis() as f64);
}

fn record_read_metrics(kind: &'static str, start: Instant, ok: bool) {
    let result_label = if ok { "ok" } else { "err" };
    metrics::counter!(
        "pnlwatch.infra.state.read.calls_total",
        "kind" => kind,
        "result" => result_label
    )
    .increment(1);
    metrics::histogram!("pnlwatch.infra.state.read_ms", "kind" => kind, "result" => result_label)
        .record(start.elapsed().as_millis() as f64);
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| format!("failed to serialize {}: {}", path.display(), err))?;
    fs::write(path, json).map_err(|err| format!("failed to write {}: {}", path.display(), err))
}

/// Missing file and corrupt content both load as the default value; a
/// corrupt document is logged and left on disk for inspection.
fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> (T, bool) {
    if !path.exists() {
        return (T::default(), true);
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read state document, starting empty");
            return (T::default(), false);
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => (value, true),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "state document is not valid JSON, starting empty");
            (T::default(), false)
        }
    }
}

impl StateStore for FilesystemStateStore {
    fn load_history(&self) -> Result<BTreeMap<String, Vec<PnlSample>>, String> {
        let start = Instant::now();
        let (history, ok) = read_json_or_default(&self.history_path);
        record_read_metrics("history", start, ok);
        Ok(history)
    }

    fn save_history(&self, history: &BTreeMap<String, Vec<PnlSample>>) -> Result<(), String> {
        let start = Instant::now();
        let result = write_json(&self.history_path, history);
        record_write_metrics("history", start, &result);
        result
    }

    fn load_hold(&self) -> Result<Vec<String>, String> {
        let start = Instant::now();
        let (symbols, ok) = read_json_or_default(&self.hold_path);
        record_read_metrics("hold", start, ok);
        Ok(symbols)
    }

    fn save_hold(&self, symbols: &[String]) -> Result<(), String> {
        let start = Instant::now();
        let result = write_json(&self.hold_path, &symbols);
        record_write_metrics("hold", start, &result);
        result
    }
}
