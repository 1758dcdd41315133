//! Line-oriented destinations for the audit channels

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Append-only text destination. Each call writes one whole line; concurrent
/// callers never interleave.
pub trait AuditSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Appends lines to a file, creating it and its parent directories
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let mut file = self.file.lock();
        file.write_all(buf.as_bytes())?;
        file.flush()
    }
}

/// Keeps lines in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl AuditSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_sink_appends_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("channel.log");

        FileSink::open(&path).unwrap().write_line("first").unwrap();
        FileSink::open(&path).unwrap().write_line("second").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_concurrent_lines_do_not_interleave() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channel.log");
        let sink = Arc::new(FileSink::open(&path).unwrap());

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    let line = format!("{}", w).repeat(512);
                    for _ in 0..50 {
                        sink.write_line(&line).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            assert_eq!(line.len(), 512);
            let first = line.chars().next().unwrap();
            assert!(line.chars().all(|c| c == first));
        }
    }
}
