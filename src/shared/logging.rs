use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
enum Sink {
    #[default]
    Stderr,
    File(PathBuf),
    Discard,
}

/// JSON-lines event log. Writes never fail the caller.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    sink: Sink,
}

impl EventLog {
    pub fn to_file(path: &Path) -> Self {
        Self {
            sink: Sink::File(path.to_path_buf()),
        }
    }

    pub fn from_config(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::to_file(path),
            None => Self::default(),
        }
    }

    pub fn discard() -> Self {
        Self {
            sink: Sink::Discard,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File(path) => Some(path),
            _ => None,
        }
    }

    pub fn info(&self, event: &str, message: &str) {
        self.append("info", event, None, message);
    }

    pub fn warn(&self, event: &str, flow_id: Option<&str>, message: &str) {
        self.append("warn", event, flow_id, message);
    }

    pub fn error(&self, event: &str, flow_id: Option<&str>, message: &str) {
        self.append("error", event, flow_id, message);
    }

    pub fn append(&self, level: &str, event: &str, flow_id: Option<&str>, message: &str) {
        let mut payload = serde_json::json!({
            "timestamp": super::now_iso(),
            "level": level,
            "event": event,
            "message": message,
        });
        if let Some(flow_id) = flow_id {
            payload["flowId"] = serde_json::Value::String(flow_id.to_string());
        }
        let Ok(line) = serde_json::to_string(&payload) else {
            return;
        };

        match &self.sink {
            Sink::Discard => {}
            Sink::Stderr => eprintln!("{line}"),
            Sink::File(path) => {
                if let Some(parent) = path.parent() {
                    if fs::create_dir_all(parent).is_err() {
                        return;
                    }
                }
                let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path)
                else {
                    return;
                };
                let _ = writeln!(file, "{line}");
            }
        }
    }
}
