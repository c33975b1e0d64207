/// The shared radio configuration document.
///
/// A single JSON document holds the alarm list and the playback intent:
///
/// ```json
/// { "alarms": [ { "name": "...", "days": [0, 1], "on": true, "hour": 7, "min": 0 } ],
///   "radio": { "playing": false, "alarm": false } }
/// ```
///
/// `radio.alarm` marks an intent that an alarm window switched on, as
/// opposed to a manual switch.
///
/// The document lives behind one mutex owned by [`ConfigStore`]. Every read
/// returns an owned copy and every write is a read-modify-write under that
/// lock followed by a full, atomic rewrite of the file on disk, so the
/// scheduler and concurrent API requests never observe a torn document.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::alarm::Alarm;
use crate::error::{Error, Result};

pub const ALARMS_KEY: &str = "alarms";
pub const PLAYING_PATH: &str = "radio/playing";
pub const ALARM_INTENT_PATH: &str = "radio/alarm";

/// The last commanded playback state and who commanded it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intent {
    pub playing: bool,
    /// Set while `playing` was switched on by an alarm window.
    pub by_alarm: bool,
}

impl Intent {
    /// Anything other than `true` reads as `false`.
    fn read(document: &Value) -> Self {
        let flag = |path: &str| {
            lookup(document, &segments(path))
                .ok()
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        Self {
            playing: flag(PLAYING_PATH),
            by_alarm: flag(ALARM_INTENT_PATH),
        }
    }

    fn write(self, document: &mut Value) -> Result<()> {
        assign(document, PLAYING_PATH, Value::Bool(self.playing))?;
        assign(document, ALARM_INTENT_PATH, Value::Bool(self.by_alarm))
    }
}

/// Document used on first start or when the file on disk cannot be read.
pub fn default_document() -> Value {
    json!({
        "alarms": [
            { "name": "Weekday wake-up", "days": [0, 1, 2, 3, 4], "on": false, "hour": 6, "min": 30 },
            { "name": "Weekend lie-in", "days": [5, 6], "on": false, "hour": 9, "min": 0 }
        ],
        "radio": { "playing": false, "alarm": false }
    })
}

pub struct ConfigStore {
    path: PathBuf,
    document: Mutex<Value>,
}

impl ConfigStore {
    /// Loads the document at `path`. A missing or unreadable file is replaced
    /// by [`default_document`], which is written out immediately.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match load_document(&path) {
            Some(document) => {
                info!(path = %path.display(), "Loaded radio config");
                Ok(Self {
                    path,
                    document: Mutex::new(document),
                })
            }
            None => {
                let store = Self {
                    path,
                    document: Mutex::new(default_document()),
                };
                store.persist(&store.lock())?;
                info!(path = %store.path.display(), "Wrote default radio config");
                Ok(store)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the value at a slash-delimited `path`
    /// (e.g. `alarms/0/hour`). An empty path returns the whole document.
    pub fn get(&self, path: &str) -> Result<Value> {
        let document = self.lock();
        lookup(&document, &segments(path)).cloned()
    }

    /// Assigns `value` at `path` and persists the document.
    ///
    /// Every segment but the last must already exist. The last segment may
    /// name a new object key but must index an existing array element.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        self.update(|document| assign(document, path, value))
    }

    /// Runs `mutate` on the document under the lock and persists the result.
    ///
    /// `mutate` must leave the document untouched when it returns an error.
    /// When the write to disk fails the mutation stays in memory and
    /// [`Error::Persistence`] is returned.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut Value) -> Result<T>) -> Result<T> {
        let mut document = self.lock();
        let out = mutate(&mut document)?;
        self.persist(&document)?;
        Ok(out)
    }

    // ── Typed accessors ──────────────────────────────────────────────────────

    /// Snapshot of the raw alarm entries, in list order.
    pub fn alarms(&self) -> Result<Vec<Value>> {
        let document = self.lock();
        lookup(&document, &[ALARMS_KEY])?
            .as_array()
            .cloned()
            .ok_or_else(|| Error::path_not_found(ALARMS_KEY))
    }

    pub fn alarm(&self, index: usize) -> Result<Value> {
        self.get(&format!("{ALARMS_KEY}/{index}"))
    }

    /// Appends `alarm` and returns the resulting list.
    pub fn append_alarm(&self, alarm: &Alarm) -> Result<Vec<Value>> {
        self.update(|document| {
            let alarms = alarm_list_mut(document)?;
            alarms.push(alarm.to_value());
            Ok(alarms.clone())
        })
    }

    /// Overwrites the fields of alarm `index` with `fields`. The merged entry
    /// must still be a valid alarm, otherwise nothing changes.
    pub fn merge_alarm(&self, index: usize, fields: &Map<String, Value>) -> Result<Alarm> {
        self.update(|document| {
            let slot = alarm_list_mut(document)?
                .get_mut(index)
                .ok_or_else(|| Error::path_not_found(format!("{ALARMS_KEY}/{index}")))?;

            let mut merged = slot.as_object().cloned().unwrap_or_default();
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
            let alarm = Alarm::from_value(&Value::Object(merged))?;
            *slot = alarm.to_value();
            Ok(alarm)
        })
    }

    /// Removes alarm `index` and returns the remaining list.
    pub fn remove_alarm(&self, index: usize) -> Result<Vec<Value>> {
        self.update(|document| {
            let alarms = alarm_list_mut(document)?;
            if index >= alarms.len() {
                return Err(Error::path_not_found(format!("{ALARMS_KEY}/{index}")));
            }
            alarms.remove(index);
            Ok(alarms.clone())
        })
    }

    pub fn intent(&self) -> Intent {
        Intent::read(&self.lock())
    }

    /// The persisted playback intent.
    pub fn playing(&self) -> bool {
        self.intent().playing
    }

    /// Records a manual on/off.
    pub fn set_playing(&self, playing: bool) -> Result<()> {
        self.with_intent(|intent| {
            *intent = Intent {
                playing,
                by_alarm: false,
            };
            Ok(())
        })
    }

    /// Runs `command` on the playback intent while holding the document lock.
    ///
    /// Player commands issued from `command` are ordered with every other
    /// intent change, so a tick can never act on an intent that a concurrent
    /// switch is about to overwrite. The document is persisted only when
    /// `command` succeeds and changed the intent.
    pub fn with_intent<T>(&self, command: impl FnOnce(&mut Intent) -> Result<T>) -> Result<T> {
        let mut document = self.lock();
        let before = Intent::read(&document);
        let mut intent = before;
        let out = command(&mut intent)?;
        if intent != before {
            intent.write(&mut document)?;
            self.persist(&document)?;
        }
        Ok(out)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Value> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes to a sibling temp file and renames it over the target so a crash
    /// mid-write never leaves a truncated document behind.
    fn persist(&self, document: &Value) -> Result<()> {
        let fail = |source: io::Error| Error::Persistence {
            path: self.path.clone(),
            source,
        };
        let content = serde_json::to_string_pretty(document).map_err(|e| fail(io::Error::other(e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(fail)?;
        fs::rename(&tmp, &self.path).map_err(fail)?;
        debug!(path = %self.path.display(), "Saved radio config");
        Ok(())
    }
}

/// Reads and parses the document, filling in missing top-level sections.
/// Returns `None` when the file is absent or not a JSON object.
fn load_document(path: &Path) -> Option<Value> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read radio config, using defaults");
            return None;
        }
    };
    let mut document: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not parse radio config, using defaults");
            return None;
        }
    };
    let Some(root) = document.as_object_mut() else {
        warn!(path = %path.display(), "Radio config is not a JSON object, using defaults");
        return None;
    };

    root.entry(ALARMS_KEY).or_insert_with(|| json!([]));
    let radio = root.entry("radio").or_insert_with(|| json!({}));
    if let Some(radio) = radio.as_object_mut() {
        radio.entry("playing").or_insert(Value::Bool(false));
        radio.entry("alarm").or_insert(Value::Bool(false));
    }
    Some(document)
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

fn lookup<'a>(root: &'a Value, segments: &[&str]) -> Result<&'a Value> {
    let mut node = root;
    for (i, segment) in segments.iter().enumerate() {
        node = child(node, segment)
            .ok_or_else(|| Error::path_not_found(segments[..=i].join("/")))?;
    }
    Ok(node)
}

fn assign(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments = segments(path);
    let Some((last, parents)) = segments.split_last() else {
        return Err(Error::path_not_found(path));
    };

    let mut node = root;
    for (i, segment) in parents.iter().enumerate() {
        node = child_mut(node, segment)
            .ok_or_else(|| Error::path_not_found(parents[..=i].join("/")))?;
    }

    match node {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
        }
        Value::Array(items) => {
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| Error::path_not_found(path))?;
            *slot = value;
        }
        _ => return Err(Error::path_not_found(path)),
    }
    Ok(())
}

fn alarm_list_mut(document: &mut Value) -> Result<&mut Vec<Value>> {
    document
        .get_mut(ALARMS_KEY)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| Error::path_not_found(ALARMS_KEY))
}
