use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde_json::json;

/// One completed cardctl operation. Each variant carries the fields that
/// identify what was touched; `record` turns it into a JSON line.
pub enum Op<'a> {
    Info { image: &'a Path },
    List { image: &'a Path, path: &'a str },
    Cat { image: &'a Path, path: &'a str },
    ReadBlock { image: &'a Path, lba: u32 },
    ShellCommand { image: &'a Path, command: &'a str, argument: &'a str },
    Failed { error: &'a str },
}

/// Append-only machine-readable trail of what cardctl did to which image.
/// Disabled unless a log path is given; human output goes straight to
/// stdout/stderr.
pub struct OpLog {
    file: Option<File>,
}

impl OpLog {
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(|| {
            std::env::var("CARDCTL_LOG_JSON_PATH")
                .ok()
                .map(PathBuf::from)
        });
        let file = match path {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening op log {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self { file })
    }

    pub fn record(&mut self, op: Op<'_>) {
        let Some(file) = &mut self.file else {
            return;
        };

        let mut entry = match op {
            Op::Info { image } => json!({
                "op": "info",
                "image": image.display().to_string(),
            }),
            Op::List { image, path } => json!({
                "op": "ls",
                "image": image.display().to_string(),
                "path": path,
            }),
            Op::Cat { image, path } => json!({
                "op": "cat",
                "image": image.display().to_string(),
                "path": path,
            }),
            Op::ReadBlock { image, lba } => json!({
                "op": "read-block",
                "image": image.display().to_string(),
                "lba": lba,
            }),
            Op::ShellCommand { image, command, argument } => json!({
                "op": "shell",
                "image": image.display().to_string(),
                "command": command,
                "argument": argument,
            }),
            Op::Failed { error } => json!({
                "op": "error",
                "error": error,
            }),
        };
        entry["ts"] = json!(unix_seconds());

        let _ = writeln!(file, "{}", entry);
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
