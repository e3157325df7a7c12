use crate::{error::SchedulingResult, types::CalendarData};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Local read-through copy of the calendar. It has no authority of its own
/// and is overwritten whenever an authoritative copy arrives. With a path the
/// copy also survives restarts as a JSON file.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    path: Option<PathBuf>,
    memory: Arc<Mutex<Option<CalendarData>>>,
}

impl LocalCache {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            memory: Arc::default(),
        }
    }

    /// Missing or unreadable files count as "no cache".
    pub fn read(&self) -> Option<CalendarData> {
        if let Some(data) = self.memory.lock().ok().and_then(|memory| memory.clone()) {
            return Some(data);
        }

        let path = self.path.as_ref()?;
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<CalendarData>(&contents) {
            Ok(data) => {
                if let Ok(mut memory) = self.memory.lock() {
                    *memory = Some(data.clone());
                }
                Some(data)
            }
            Err(err) => {
                warn!(?err, path = %path.display(), "Ignoring corrupt calendar cache");
                None
            }
        }
    }

    pub fn write(&self, data: &CalendarData) -> SchedulingResult<()> {
        if let Ok(mut memory) = self.memory.lock() {
            *memory = Some(data.clone());
        }

        if let Some(path) = &self.path {
            write_atomically(path, data)?;
            debug!(path = %path.display(), "Wrote calendar cache");
        }
        Ok(())
    }
}

fn write_atomically(path: &Path, data: &CalendarData) -> SchedulingResult<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory)?;

    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(serde_json::to_string_pretty(data)?.as_bytes())?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::slot;
    use chrono::Utc;

    #[test]
    fn test_memory_only_cache() {
        let cache = LocalCache::default();
        assert!(cache.read().is_none());

        let data = CalendarData::from_slots([slot("2024-06-10", "19:00", "19:30")], Some(Utc::now()));
        cache.write(&data).unwrap();
        assert_eq!(cache.read(), Some(data));
    }

    #[test]
    fn test_cache_survives_restart() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("cache").join("calendar.json");
        let data = CalendarData::from_slots(
            [
                slot("2024-06-10", "19:00", "19:30"),
                slot("2024-06-11", "09:00", "09:30"),
            ],
            Some(Utc::now()),
        );

        LocalCache::new(Some(path.clone())).write(&data).unwrap();

        let reopened = LocalCache::new(Some(path));
        assert_eq!(reopened.read(), Some(data));
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("calendar.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(LocalCache::new(Some(path)).read().is_none());
    }
}
