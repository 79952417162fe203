//! Layout of the persisted projects list.
//!
//! ```text
//! app/projects/1/path = "/home/user/nucleo-blink"
//! app/projects/size   = 1
//! ```

use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};

use crate::settings::SettingsStore;

const GROUP: &str = "app";
const ARRAY: &str = "projects";
const PATH_KEY: &str = "path";

/// Replaces the stored projects array with `paths` and flushes the store.
///
/// A flush failure is logged; the in-memory store still holds the new array.
pub fn write_project_paths(store: &mut dyn SettingsStore, paths: &[PathBuf]) {
    store.begin_group(GROUP);
    store.remove(ARRAY);
    store.begin_write_array(ARRAY);
    for (index, path) in paths.iter().enumerate() {
        store.set_array_index(index);
        store.set_value(PATH_KEY, Value::from(path.to_string_lossy().into_owned()));
    }
    store.end_array();
    store.end_group();

    if let Err(e) = store.sync() {
        warn!(error = %e, "Failed to flush settings");
    }

    info!("{} projects have been saved to Settings", paths.len());
}

/// Reads the stored projects array. Entries without a string path are skipped.
#[must_use]
pub fn read_project_paths(store: &mut dyn SettingsStore) -> Vec<String> {
    store.begin_group(GROUP);
    let size = store.begin_read_array(ARRAY);
    let mut paths = Vec::with_capacity(size);
    for index in 0..size {
        store.set_array_index(index);
        match store.value(PATH_KEY) {
            Some(Value::String(path)) => paths.push(path),
            other => warn!(index, value = ?other, "Skipping stored project without a path"),
        }
    }
    store.end_array();
    store.end_group();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    #[test]
    fn write_replaces_the_whole_array() {
        let mut settings = Settings::in_memory();
        write_project_paths(
            &mut settings,
            &[PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")],
        );
        write_project_paths(&mut settings, &[PathBuf::from("/c")]);

        assert_eq!(read_project_paths(&mut settings), vec!["/c".to_string()]);
        assert!(!settings.contains("app/projects/2/path"));
        assert_eq!(settings.keys().filter(|k| k.starts_with("app/")).count(), 2);
    }

    #[test]
    fn empty_store_reads_nothing() {
        let mut settings = Settings::in_memory();
        assert!(read_project_paths(&mut settings).is_empty());
    }

    #[test]
    fn non_string_entries_are_skipped() {
        let mut settings = Settings::in_memory();
        write_project_paths(&mut settings, &[PathBuf::from("/a"), PathBuf::from("/b")]);

        settings.begin_group("app");
        settings.begin_write_array("projects");
        settings.set_array_index(0);
        settings.set_value("path", Value::from(7));
        settings.set_array_index(1);
        settings.set_value("path", Value::from("/b"));
        settings.end_array();
        settings.end_group();

        assert_eq!(read_project_paths(&mut settings), vec!["/b".to_string()]);
    }

    #[test]
    fn round_trips_through_a_file() {
        let temp = tempfile::tempdir().expect("temp dir");
        let file = temp.path().join("settings.json");

        let mut settings = Settings::open(&file).expect("open");
        write_project_paths(&mut settings, &[PathBuf::from("/work/blink")]);

        let mut reopened = Settings::open(&file).expect("reopen");
        assert_eq!(
            read_project_paths(&mut reopened),
            vec!["/work/blink".to_string()]
        );
    }
}
