use std::fs;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;

/// Memoized modification times, in milliseconds since the epoch.
///
/// A missing or unreadable file has time 0. Each file is queried at most once
/// per cache.
#[derive(Debug, Default)]
pub struct FileStatCache {
    times: DashMap<Utf8PathBuf, u64>,
}

impl FileStatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modification_time(&self, file: &Utf8Path) -> u64 {
        if let Some(time) = self.times.get(file) {
            return *time;
        }
        *self
            .times
            .entry(file.to_path_buf())
            .or_insert_with(|| read_modification_time(file))
    }

    pub fn exists(&self, file: &Utf8Path) -> bool {
        self.modification_time(file) != 0
    }

    pub fn is_missing_or_modified_before(&self, file: &Utf8Path, target: u64) -> bool {
        let time = self.modification_time(file);
        time == 0 || time < target
    }

    pub fn is_missing_or_modified_after(&self, file: &Utf8Path, target: u64) -> bool {
        let time = self.modification_time(file);
        time == 0 || time > target
    }
}

pub(crate) fn read_modification_time(file: &Utf8Path) -> u64 {
    fs::metadata(file)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Utf8PathBuf::from_path_buf(dir.path().join("nothing")).unwrap();
        let cache = FileStatCache::new();

        assert_eq!(cache.modification_time(&missing), 0);
        assert!(!cache.exists(&missing));
        assert!(cache.is_missing_or_modified_before(&missing, 1));
        assert!(cache.is_missing_or_modified_after(&missing, u64::MAX));
    }

    #[test]
    fn test_times_are_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("file")).unwrap();
        let file = File::create(&path).unwrap();
        let then = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        file.set_modified(then).unwrap();

        let cache = FileStatCache::new();
        let first = cache.modification_time(&path);
        assert_eq!(first, 1_000_000_000);
        assert!(cache.is_missing_or_modified_before(&path, first + 1));
        assert!(!cache.is_missing_or_modified_before(&path, first));
        assert!(cache.is_missing_or_modified_after(&path, first - 1));

        file.set_modified(then + Duration::from_secs(60)).unwrap();
        assert_eq!(cache.modification_time(&path), first);
    }
}
