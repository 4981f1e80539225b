use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Value of one field in a JSON-lines debug event.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Field<'a> {
    Str(&'a str),
    Num(u64),
    Bool(bool),
}

/// JSON-lines event sink. One object per line, `{"type": ..., ...fields}`.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: BufWriter<File>,
    counters: BTreeMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: BufWriter::new(file),
                counters: BTreeMap::new(),
            })),
        })
    }

    pub fn event(&self, kind: &str, fields: &[(&str, Field<'_>)]) {
        let json = event_json(kind, fields);
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{json}");
            let entry = state.counters.entry(kind.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    /// Writes the accumulated counters as a `debug.summary` event and resets them.
    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let counters = std::mem::take(&mut state.counters);
            let mut counts = String::from("{");
            for (idx, (key, value)) in counters.iter().enumerate() {
                if idx > 0 {
                    counts.push(',');
                }
                counts.push_str(&format!("\"{}\":{}", json_escape(key), value));
            }
            counts.push('}');
            let json = format!(
                "{{\"type\":\"debug.summary\",\"context\":\"{}\",\"counts\":{}}}",
                json_escape(context),
                counts
            );
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

fn event_json(kind: &str, fields: &[(&str, Field<'_>)]) -> String {
    let mut out = format!("{{\"type\":\"{}\"", json_escape(kind));
    for (key, value) in fields {
        out.push_str(&format!(",\"{}\":", json_escape(key)));
        match value {
            Field::Str(s) => out.push_str(&format!("\"{}\"", json_escape(s))),
            Field::Num(n) => out.push_str(&n.to_string()),
            Field::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        }
    }
    out.push('}');
    out
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_escapes_and_orders_fields() {
        let json = event_json(
            "scan.revision",
            &[
                ("unit", Field::Str("V000001")),
                ("path", Field::Str("a\"b\\c")),
                ("selected", Field::Bool(true)),
                ("count", Field::Num(3)),
            ],
        );
        assert_eq!(
            json,
            "{\"type\":\"scan.revision\",\"unit\":\"V000001\",\"path\":\"a\\\"b\\\\c\",\"selected\":true,\"count\":3}"
        );
    }

    #[test]
    fn summary_counts_events_by_type() {
        let path = std::env::temp_dir().join(format!(
            "mfg_protocol_debug_{}_{}.jsonl",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let logger = DebugLogger::new(&path).expect("logger");
        logger.event("validate.unit", &[("unit", Field::Str("V000001"))]);
        logger.event("validate.unit", &[("unit", Field::Str("V000002"))]);
        logger.increment("paginate.pages", 4);
        logger.emit_summary("run");
        logger.flush();
        let text = std::fs::read_to_string(&path).expect("read");
        let last = text.lines().last().expect("summary line");
        assert_eq!(
            last,
            "{\"type\":\"debug.summary\",\"context\":\"run\",\"counts\":{\"paginate.pages\":4,\"validate.unit\":2}}"
        );
    }
}
