use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::debug::json_escape;

#[derive(Clone)]
pub(crate) struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, name: &str, ms: f64) {
        let json = format!(
            "{{\"type\":\"perf.span\",\"name\":\"{}\",\"unit\":\"ms\",\"ms\":{:.3}}}",
            json_escape(name),
            ms
        );
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

/// Runs `f` and records its wall time under `name` when a logger is present.
pub(crate) fn timed<T>(perf: Option<&PerfLogger>, name: &str, f: impl FnOnce() -> T) -> T {
    let Some(perf) = perf else {
        return f();
    };
    let start = Instant::now();
    let out = f();
    perf.log_span_ms(name, start.elapsed().as_secs_f64() * 1000.0);
    out
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let hot_path = hot_path_for(&self.path);
        let Ok(file) = File::create(&hot_path) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| {
            b.1.partial_cmp(a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        for (rank, (name, ms)) in spans.into_iter().enumerate() {
            let count = *self.span_counts.get(name).unwrap_or(&1);
            let avg = if count == 0 { 0.0 } else { ms / count as f64 };
            let _ = writeln!(
                writer,
                "{{\"type\":\"perf.hot.span\",\"rank\":{},\"name\":\"{}\",\"unit\":\"ms\",\"ms\":{:.3},\"count\":{},\"avg_ms\":{:.3}}}",
                rank + 1,
                json_escape(name),
                ms,
                count,
                avg
            );
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("mfg_protocol_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_path_keeps_directory_and_drops_extension() {
        let hot = hot_path_for(Path::new("/tmp/run/perf.jsonl"));
        assert_eq!(hot, PathBuf::from("/tmp/run/perf_hot.log"));
        let hot = hot_path_for(Path::new("perf"));
        assert_eq!(hot, PathBuf::from("perf_hot.log"));
    }

    #[test]
    fn timed_without_logger_just_runs() {
        assert_eq!(timed(None, "noop", || 7), 7);
    }

    #[test]
    fn dropping_logger_writes_hot_summary() {
        let dir = std::env::temp_dir().join(format!(
            "mfg_protocol_perf_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("perf.log");
        {
            let perf = PerfLogger::new(&path).expect("perf");
            timed(Some(&perf), "scan", || ());
            timed(Some(&perf), "scan", || ());
        }
        let hot = std::fs::read_to_string(dir.join("perf_hot.log")).expect("hot log");
        assert!(hot.contains("\"name\":\"scan\""));
        assert!(hot.contains("\"count\":2"));
    }
}
