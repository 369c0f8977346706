//! dbm-style file engine: one hash file per sub-cache.
//!
//! Each table lives in `<base_directory>/<db_name>.db` as an append-only log
//! of JSON lines, `{"put":[key,value]}` or `{"del":key}`, replayed into an
//! unordered hash map when read. Multi-valued entries store their list as
//! a JSON-encoded string, single-valued entries the bare value.
//!
//! # Locking
//!
//! - A [`DbmWriter`] holds an exclusive `flock` on the table file from
//!   creation until drop, so one writer at a time per table across all
//!   processes on the host. Buffered records are appended and `fsync`ed on
//!   commit.
//! - Readers take no lock. A reader racing a writer sees the state before
//!   the commit, or stops at a torn trailing record (logged, skipped).
//!
//! # Maintenance
//!
//! The log grows with every write, and a process that has not seen the
//! current file yet replays all of it, so the cost of the first read grows
//! with the write history. Within one process the last replay is kept and
//! reused while the file's inode, length and mtime are unchanged.
//! `cleanup()` reorganizes the table by writing the live entries to a temp
//! file and renaming it over the log.
//! `clear()` replaces the file the same way, so committed records are
//! never removed from a file in place.
//! Writers re-check the inode after locking so none of them appends to a
//! file that has already been replaced.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use ldapcache_core::{CacheResult, StorageError};
use serde::{Deserialize, Serialize};

use crate::lock::FlockGuard;
use crate::ownership::FileOwnership;
use crate::traits::{CacheReader, CacheValue, CacheWriter, Layout, SubCache};

/// Consecutive failed reorganizations that are only logged. The next
/// failure after these is returned to the caller.
pub const MAX_CLEANUP_FAILURES: u32 = 5;

const TABLE_SUFFIX: &str = "db";
const REORGANIZE_SUFFIX: &str = "db.reorganize";

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Record {
    Put(String, String),
    Del(String),
}

/// Table state replayed from the log.
struct Replayed {
    entries: HashMap<String, String>,
    /// Length of the log up to the last complete record.
    valid_len: u64,
}

fn replay(bytes: &[u8], path: &Path) -> Result<Replayed, StorageError> {
    let mut entries = HashMap::new();
    let mut valid_len = 0usize;
    let mut line_no = 0usize;

    while valid_len < bytes.len() {
        line_no += 1;
        let rest = &bytes[valid_len..];
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            tracing::warn!(
                path = %path.display(),
                line = line_no,
                bytes = rest.len(),
                "Skipping torn trailing record"
            );
            break;
        };
        let body = &rest[..end];
        valid_len += end + 1;
        if body.is_empty() {
            continue;
        }
        let record = serde_json::from_slice::<Record>(body).map_err(|e| StorageError::Corrupt {
            path: path.display().to_string(),
            line: line_no,
            reason: e.to_string(),
        })?;
        match record {
            Record::Put(key, value) => {
                entries.insert(key, value);
            }
            Record::Del(key) => {
                entries.remove(&key);
            }
        }
    }

    Ok(Replayed {
        entries,
        valid_len: valid_len as u64,
    })
}

/// Identity of one state of a table file. The log only grows between
/// reorganizations, so an equal stamp means equal content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    ino: u64,
    len: u64,
    mtime: (i64, i64),
}

impl FileStamp {
    fn of(file: &File, path: &Path) -> Result<Self, StorageError> {
        let meta = file.metadata().map_err(|e| StorageError::io(path, e))?;
        Ok(Self {
            ino: meta.ino(),
            len: meta.len(),
            mtime: (meta.mtime(), meta.mtime_nsec()),
        })
    }
}

fn decode(name: &str, layout: Layout, raw: Option<&String>) -> CacheResult<CacheValue> {
    match (layout.single_value, raw) {
        (true, value) => Ok(CacheValue::Single(value.cloned())),
        (false, None) => Ok(CacheValue::Multi(Vec::new())),
        (false, Some(raw)) => serde_json::from_str::<Vec<String>>(raw)
            .map(CacheValue::Multi)
            .map_err(|e| {
                StorageError::Serialization {
                    sub_cache: name.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
    }
}

fn encode_list(name: &str, values: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(values).map_err(|e| StorageError::Serialization {
        sub_cache: name.to_string(),
        reason: e.to_string(),
    })
}

/// A sub-cache stored in its own dbm-style file.
#[derive(Debug)]
pub struct DbmCache {
    name: String,
    path: PathBuf,
    layout: Layout,
    ownership: FileOwnership,
    /// Consecutive failed reorganizations.
    fail_count: AtomicU32,
    /// Last replayed state and the file it was read from.
    replayed: RwLock<Option<(FileStamp, HashMap<String, String>)>>,
}

impl DbmCache {
    /// Bind a table in `base_directory`. The file itself is created on the
    /// first write.
    pub fn new(
        base_directory: &Path,
        name: impl Into<String>,
        layout: Layout,
        ownership: FileOwnership,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(base_directory).map_err(|e| StorageError::io(base_directory, e))?;
        let name = name.into();
        let path = base_directory.join(format!("{name}.{TABLE_SUFFIX}"));
        Ok(Self {
            name,
            path,
            layout,
            ownership,
            fail_count: AtomicU32::new(0),
            replayed: RwLock::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reorganize_path(&self) -> PathBuf {
        self.path.with_extension(REORGANIZE_SUFFIX)
    }

    fn cached(&self, stamp: FileStamp) -> Option<HashMap<String, String>> {
        match self.replayed.read() {
            Ok(slot) => slot
                .as_ref()
                .filter(|(cached, _)| *cached == stamp)
                .map(|(_, entries)| entries.clone()),
            Err(_) => None,
        }
    }

    fn remember(&self, stamp: FileStamp, entries: &HashMap<String, String>) {
        if let Ok(mut slot) = self.replayed.write() {
            *slot = Some((stamp, entries.clone()));
        }
    }

    /// Read and replay `file` from the start, reusing the last replay when
    /// the file is unchanged since. Also returns the number of bytes seen.
    fn replay_file(&self, file: &mut File) -> Result<(Replayed, u64), StorageError> {
        let stamp = FileStamp::of(file, &self.path)?;
        if let Some(entries) = self.cached(stamp) {
            let replayed = Replayed {
                entries,
                valid_len: stamp.len,
            };
            return Ok((replayed, stamp.len));
        }
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut bytes))
            .map_err(|e| StorageError::io(&self.path, e))?;
        let replayed = replay(&bytes, &self.path)?;
        let read_len = bytes.len() as u64;
        if read_len == stamp.len && replayed.valid_len == read_len {
            self.remember(stamp, &replayed.entries);
        }
        Ok((replayed, read_len))
    }

    fn snapshot(&self) -> Result<HashMap<String, String>, StorageError> {
        match File::open(&self.path) {
            Ok(mut file) => Ok(self.replay_file(&mut file)?.0.entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// Open and exclusively lock the current table file, creating it if
    /// needed.
    fn lock(&self) -> Result<FlockGuard, StorageError> {
        loop {
            let existed = self.path.exists();
            let file = OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(&self.path)
                .map_err(|e| StorageError::io(&self.path, e))?;
            if !existed {
                self.ownership.apply(&self.path)?;
            }
            let guard = FlockGuard::lock_exclusive(file, &self.path)?;

            let locked_ino = guard
                .file()
                .metadata()
                .map_err(|e| StorageError::io(&self.path, e))?
                .ino();
            match std::fs::metadata(&self.path) {
                Ok(meta) if meta.ino() == locked_ino => return Ok(guard),
                Ok(_) => tracing::debug!(path = %self.path.display(), "Table replaced while waiting for lock, retrying"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&self.path, e)),
            }
        }
    }

    fn read_locked(&self, guard: &mut FlockGuard) -> Result<Replayed, StorageError> {
        let (replayed, read_len) = self.replay_file(guard.file_mut())?;
        if replayed.valid_len < read_len {
            guard
                .file()
                .set_len(replayed.valid_len)
                .map_err(|e| StorageError::io(&self.path, e))?;
            tracing::info!(
                path = %self.path.display(),
                dropped = read_len - replayed.valid_len,
                "Truncated torn trailing record"
            );
        }
        Ok(replayed)
    }

    /// Replace the table file with one holding exactly `entries`. The
    /// caller holds the table lock.
    fn rewrite(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let tmp_path = self.reorganize_path();
        let mut buf = Vec::new();
        for (key, value) in entries {
            serde_json::to_writer(&mut buf, &Record::Put(key.clone(), value.clone())).map_err(
                |e| StorageError::Serialization {
                    sub_cache: self.name.clone(),
                    reason: e.to_string(),
                },
            )?;
            buf.push(b'\n');
        }
        let mut tmp = File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
        tmp.write_all(&buf)
            .and_then(|_| tmp.sync_all())
            .map_err(|e| StorageError::io(&tmp_path, e))?;
        self.ownership.apply(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::io(&self.path, e))
    }

    /// Rewrite the table with only its live entries.
    fn reorganize(&self) -> Result<(), StorageError> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut guard = self.lock()?;
        let replayed = self.read_locked(&mut guard)?;
        self.rewrite(&replayed.entries)?;
        tracing::debug!(
            sub_cache = %self.name,
            entries = replayed.entries.len(),
            "Reorganized table"
        );
        drop(guard);
        Ok(())
    }
}

impl SubCache for DbmCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> Layout {
        self.layout
    }

    fn reader(&self) -> CacheResult<Box<dyn CacheReader + '_>> {
        Ok(Box::new(DbmReader {
            cache: self,
            entries: self.snapshot()?,
        }))
    }

    fn writer(&self) -> CacheResult<Box<dyn CacheWriter + '_>> {
        let mut guard = self.lock()?;
        let replayed = self.read_locked(&mut guard)?;
        Ok(Box::new(DbmWriter {
            cache: self,
            guard,
            entries: replayed.entries,
            pending: Vec::new(),
        }))
    }

    fn load(&self) -> CacheResult<BTreeMap<String, CacheValue>> {
        let entries = self.snapshot()?;
        let mut loaded = BTreeMap::new();
        for (key, raw) in &entries {
            loaded.insert(key.clone(), decode(&self.name, self.layout, Some(raw))?);
        }
        Ok(loaded)
    }

    fn clear(&self) -> CacheResult<()> {
        let guard = self.lock()?;
        self.rewrite(&HashMap::new())?;
        drop(guard);
        Ok(())
    }

    fn cleanup(&self) -> CacheResult<()> {
        match self.reorganize() {
            Ok(()) => {
                self.fail_count.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                let attempts = self.fail_count.fetch_add(1, Ordering::SeqCst) + 1;
                if attempts > MAX_CLEANUP_FAILURES {
                    return Err(StorageError::CleanupFailed {
                        sub_cache: self.name.clone(),
                        attempts,
                        reason: err.to_string(),
                    }
                    .into());
                }
                tracing::warn!(
                    sub_cache = %self.name,
                    attempts,
                    error = %err,
                    "Reorganize failed, will retry on next cleanup"
                );
                Ok(())
            }
        }
    }
}

/// Unlocked snapshot of a table.
pub struct DbmReader<'a> {
    cache: &'a DbmCache,
    entries: HashMap<String, String>,
}

impl CacheReader for DbmReader<'_> {
    fn get(&self, key: &str) -> CacheResult<CacheValue> {
        decode(&self.cache.name, self.cache.layout, self.entries.get(key))
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Locked write handle on a table.
pub struct DbmWriter<'a> {
    cache: &'a DbmCache,
    guard: FlockGuard,
    entries: HashMap<String, String>,
    pending: Vec<Record>,
}

impl DbmWriter<'_> {
    fn put(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value.clone());
        self.pending.push(Record::Put(key.to_string(), value));
    }

    fn del(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.pending.push(Record::Del(key.to_string()));
        }
    }

    fn list(&self, key: &str) -> CacheResult<Vec<String>> {
        Ok(decode(&self.cache.name, Layout::MULTI, self.entries.get(key))?.into_values())
    }
}

impl CacheWriter for DbmWriter<'_> {
    fn get(&self, key: &str) -> CacheResult<CacheValue> {
        decode(&self.cache.name, self.cache.layout, self.entries.get(key))
    }

    fn save(&mut self, key: &str, values: &[String]) -> CacheResult<()> {
        let layout = self.cache.layout;
        if layout.reverse {
            for value in values {
                let mut members = self.list(value)?;
                if !members.iter().any(|m| m == key) {
                    members.push(key.to_string());
                    let encoded = encode_list(&self.cache.name, &members)?;
                    self.put(value, encoded);
                }
            }
        } else if layout.single_value {
            match values.first() {
                Some(value) => self.put(key, value.clone()),
                None => self.del(key),
            }
        } else {
            self.del(key);
            if !values.is_empty() {
                let encoded = encode_list(&self.cache.name, values)?;
                self.put(key, encoded);
            }
        }
        Ok(())
    }

    fn delete(&mut self, key: &str, values: &[String]) -> CacheResult<()> {
        if !self.cache.layout.reverse {
            self.del(key);
            return Ok(());
        }
        for value in values {
            let mut members = self.list(value)?;
            let before = members.len();
            members.retain(|m| m != key);
            if members.len() == before {
                continue;
            }
            if members.is_empty() {
                self.del(value);
            } else {
                let encoded = encode_list(&self.cache.name, &members)?;
                self.put(value, encoded);
            }
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> CacheResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for record in &self.pending {
            serde_json::to_writer(&mut buf, record).map_err(|e| StorageError::Serialization {
                sub_cache: self.cache.name.clone(),
                reason: e.to_string(),
            })?;
            buf.push(b'\n');
        }
        let cache = self.cache;
        let file = self.guard.file_mut();
        file.write_all(&buf)
            .and_then(|_| file.sync_data())
            .map_err(|e| StorageError::io(&cache.path, e))?;
        cache.remember(FileStamp::of(file, &cache.path)?, &self.entries);
        Ok(())
    }
}
