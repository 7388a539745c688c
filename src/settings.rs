//! Persisted settings (spec.md §6.2).
//!
//! A single JSON document, dot-path keyed, written atomically
//! (write-to-tmp, rename) and directory-creating. The core only reads the
//! handful of knobs the hard subsystems need (`memoryScan.readerThreads`,
//! `memoryScan.threadBufferSizeMB`); everything else under `general.*`,
//! `plugins.*`, `language.*`, `uiState.*` is opaque passthrough, since those
//! are settings/language-catalog concerns explicitly out of scope beyond the
//! few knobs the core reads (spec.md §1).

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::error::{Result, VertexError};

pub const DEFAULT_READER_THREADS: u32 = 2;
pub const DEFAULT_THREAD_BUFFER_SIZE_MB: u32 = 32;

#[derive(Debug)]
pub struct Settings {
    path: PathBuf,
    document: Value,
}

impl Settings {
    /// Builds the default document matching the key table in spec.md §6.2.
    fn defaults() -> Value {
        json!({
            "general": {
                "theme": 0,
                "enableLogging": true
            },
            "memoryScan": {
                "readerThreads": DEFAULT_READER_THREADS,
                "threadBufferSizeMB": DEFAULT_THREAD_BUFFER_SIZE_MB
            },
            "plugins": {
                "pluginPaths": [],
                "activePlugin": ""
            },
            "language": {
                "activeLanguage": "en",
                "languagePaths": []
            },
            "uiState": {
                "mainView": {}
            }
        })
    }

    /// Loads `path` if it exists and parses as valid JSON, falling back to
    /// defaults otherwise (spec.md §7: `FsJsonParse`/`FileNotFound` fall
    /// back to defaults and log).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(Self::defaults);
        Self { path, document }
    }

    pub fn new_in_memory() -> Self {
        Self { path: PathBuf::new(), document: Self::defaults() }
    }

    /// Atomic save: write to a sibling temp file, then rename over the
    /// target. Creates the parent directory if missing.
    pub fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| VertexError::General(e.to_string()))?;
        }
        let serialized = serde_json::to_string_pretty(&self.document)
            .map_err(|e| VertexError::FsJsonParse(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.path.parent().unwrap_or_else(|| Path::new(".")))
            .map_err(|e| VertexError::General(e.to_string()))?;
        use std::io::Write;
        tmp.write_all(serialized.as_bytes()).map_err(|e| VertexError::General(e.to_string()))?;
        tmp.persist(&self.path).map_err(|e| VertexError::General(e.to_string()))?;
        Ok(())
    }

    /// Resolves a dot-path key, e.g. `"memoryScan.readerThreads"`.
    pub fn get(&self, dot_path: &str) -> Result<&Value> {
        let mut cursor = &self.document;
        for segment in dot_path.split('.') {
            cursor = cursor
                .get(segment)
                .ok_or_else(|| VertexError::FsJsonKeyNotFound(dot_path.to_string()))?;
        }
        Ok(cursor)
    }

    pub fn set(&mut self, dot_path: &str, value: Value) {
        let segments: Vec<&str> = dot_path.split('.').collect();
        let mut cursor = &mut self.document;
        for segment in &segments[..segments.len() - 1] {
            cursor = cursor
                .as_object_mut()
                .expect("settings document root must be an object")
                .entry(segment.to_string())
                .or_insert_with(|| json!({}));
        }
        if let Some(obj) = cursor.as_object_mut() {
            obj.insert(segments[segments.len() - 1].to_string(), value);
        }
    }

    pub fn reader_threads(&self) -> u32 {
        self.get("memoryScan.readerThreads")
            .ok()
            .and_then(|v| v.as_u64())
            .map(|v| v.clamp(1, 64) as u32)
            .unwrap_or(DEFAULT_READER_THREADS)
    }

    pub fn thread_buffer_size_mb(&self) -> u32 {
        self.get("memoryScan.threadBufferSizeMB")
            .ok()
            .and_then(|v| v.as_u64())
            .map(|v| v.clamp(1, 512) as u32)
            .unwrap_or(DEFAULT_THREAD_BUFFER_SIZE_MB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let settings = Settings::new_in_memory();
        assert_eq!(settings.reader_threads(), 2);
        assert_eq!(settings.thread_buffer_size_mb(), 32);
    }

    #[test]
    fn dot_path_get_set_round_trips() {
        let mut settings = Settings::new_in_memory();
        settings.set("memoryScan.readerThreads", json!(8));
        assert_eq!(settings.reader_threads(), 8);
    }

    #[test]
    fn missing_key_not_found() {
        let settings = Settings::new_in_memory();
        assert!(matches!(settings.get("does.not.exist"), Err(VertexError::FsJsonKeyNotFound(_))));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::load(&path);
        settings.set("memoryScan.readerThreads", json!(16));
        settings.save().unwrap();

        let reloaded = Settings::load(&path);
        assert_eq!(reloaded.reader_threads(), 16);
    }
}
