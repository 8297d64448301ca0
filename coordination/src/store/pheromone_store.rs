//! The pheromone store: a concurrent, durable, audit-logged key/value
//! medium over three JSON-file namespaces, guarded by OS-level advisory
//! file locks. Ported from `environment/pheromone_store.py`.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::{Map, Value};
use tracing::warn;

use crate::decay::{decay_inhibition, decay_intensity, DecayType};
use crate::error::StoreError;
use crate::guardrails::{Guardrails, SYSTEM_DECAY, SYSTEM_RETRY};
use crate::store::query::{matches_filters, parse_filter};
use crate::store::types::{AuditAction, AuditEvent, FileKey, Namespace};

#[derive(Debug, Default)]
pub struct MaintainReport {
    pub ttl_released: Vec<FileKey>,
    pub retry_requeued: Vec<FileKey>,
}

pub struct PheromoneStore {
    base_dir: PathBuf,
}

impl PheromoneStore {
    /// Open (creating if absent) the pheromone store rooted at
    /// `base_dir/pheromones/`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| StoreError::Io {
            path: base_dir.display().to_string(),
            source: e,
        })?;
        let store = Self { base_dir };
        store.ensure_store_files()?;
        Ok(store)
    }

    fn ensure_store_files(&self) -> Result<(), StoreError> {
        for ns in [Namespace::Tasks, Namespace::Status, Namespace::Quality] {
            let path = self.namespace_path(ns);
            if !path.exists() {
                self.write_json_file(&path, &Map::new())?;
            }
        }
        let audit = self.audit_path();
        if !audit.exists() {
            File::create(&audit).map_err(|e| StoreError::Io {
                path: audit.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn namespace_path(&self, ns: Namespace) -> PathBuf {
        self.base_dir.join(ns.file_name())
    }

    /// Path to the append-only audit log, exposed so the metrics
    /// collector can scan it (spec §4.7).
    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_path()
    }

    fn audit_path(&self) -> PathBuf {
        self.base_dir.join("audit_log.jsonl")
    }

    fn read_json_file(&self, path: &Path) -> Result<Map<String, Value>, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.lock_shared().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let _ = FileExt::unlock(&file);
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents).map_err(|e| StoreError::StoreIntegrity {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn write_json_file(&self, path: &Path, data: &Map<String, Value>) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.lock_exclusive().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let serialized = serde_json::to_string_pretty(data)?;
        file.seek(SeekFrom::Start(0)).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        file.set_len(0).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        file.write_all(serialized.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.sync_all().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let _ = FileExt::unlock(&file);
        Ok(())
    }

    /// Exclusive read-modify-write critical section over one namespace
    /// file. `f` receives the whole-namespace map and returns the
    /// extra value to propagate to the caller.
    fn with_exclusive<T>(
        &self,
        ns: Namespace,
        f: impl FnOnce(&mut Map<String, Value>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let path = self.namespace_path(ns);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.lock_exclusive().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut data: Map<String, Value> = if contents.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&contents).map_err(|e| StoreError::StoreIntegrity {
                path: path.display().to_string(),
                source: e,
            })?
        };

        let result = f(&mut data)?;

        let serialized = serde_json::to_string_pretty(&data)?;
        file.seek(SeekFrom::Start(0)).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        file.set_len(0).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        file.write_all(serialized.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.sync_all().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let _ = FileExt::unlock(&file);
        Ok(result)
    }

    fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let path = self.audit_path();
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.lock_exclusive().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let line = serde_json::to_string(event)?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        let _ = FileExt::unlock(&file);
        Ok(())
    }

    pub fn read_all(&self, ns: Namespace) -> Result<Map<String, Value>, StoreError> {
        self.read_json_file(&self.namespace_path(ns))
    }

    pub fn read_one(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_all(ns)?.get(key).cloned())
    }

    /// `query(ns, filters)`: filters are `(raw_key, value)` pairs, AND-ed.
    pub fn query(
        &self,
        ns: Namespace,
        raw_filters: &[(String, Value)],
    ) -> Result<Map<String, Value>, StoreError> {
        let filters = raw_filters
            .iter()
            .map(|(k, v)| parse_filter(k, v.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let all = self.read_all(ns)?;
        let mut out = Map::new();
        for (key, value) in all {
            let Some(entry) = value.as_object() else {
                continue;
            };
            if matches_filters(&key, entry, &filters)? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    fn status_entry_for_scope_check(&self, key: &str) -> Result<Option<Map<String, Value>>, StoreError> {
        Ok(self
            .read_one(Namespace::Status, key)?
            .and_then(|v| v.as_object().cloned()))
    }

    /// Full overwrite of an entry. Runs the status finalizer (when
    /// `ns == Status`) then stamps and audits.
    pub fn write(
        &self,
        ns: Namespace,
        key: &str,
        data: Map<String, Value>,
        agent: &str,
        guardrails: &Guardrails,
    ) -> Result<(), StoreError> {
        self.write_or_update(ns, key, agent, guardrails, true, data)
    }

    /// Merge `fields` on top of the existing entry. Same finalize+stamp
    /// path as `write`.
    pub fn update(
        &self,
        ns: Namespace,
        key: &str,
        agent: &str,
        fields: Map<String, Value>,
        guardrails: &Guardrails,
    ) -> Result<(), StoreError> {
        self.write_or_update(ns, key, agent, guardrails, false, fields)
    }

    fn write_or_update(
        &self,
        ns: Namespace,
        key: &str,
        agent: &str,
        guardrails: &Guardrails,
        is_write: bool,
        payload: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let status_check = self.status_entry_for_scope_check(key)?;
        guardrails
            .enforce_scope_lock(key, agent, status_check.as_ref())
            .map_err(|e| match e {
                crate::error::GuardrailError::ScopeLock {
                    file_key,
                    holder,
                    requester,
                } => StoreError::ScopeLock {
                    file_key,
                    holder,
                    requester,
                },
                _ => unreachable!(),
            })?;

        self.with_exclusive(ns, |namespace_map| {
            let previous = namespace_map.get(key).and_then(Value::as_object).cloned();

            let mut candidate = if is_write {
                payload.clone()
            } else {
                let mut merged = previous.clone().unwrap_or_default();
                for (k, v) in payload.clone() {
                    merged.insert(k, v);
                }
                merged
            };

            if ns == Namespace::Status {
                finalize_status_entry(guardrails, agent, previous.as_ref(), &mut candidate);
            }

            crate::guardrails::stamp_trace(&mut candidate, agent, is_write);

            let (fields_changed, previous_values) =
                diff_entries(previous.as_ref(), &candidate);

            namespace_map.insert(key.to_string(), Value::Object(candidate.clone()));

            if !fields_changed.is_empty() {
                let event = AuditEvent {
                    timestamp: candidate
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    agent: agent.to_string(),
                    pheromone_type: ns.as_str().to_string(),
                    file_key: key.to_string(),
                    action: if is_write {
                        AuditAction::Write
                    } else {
                        AuditAction::Update
                    },
                    fields_changed,
                    previous_values,
                };
                self.append_audit_event(&event)?;
            }
            Ok(())
        })
    }

    /// `apply_decay("tasks")`: decay intensity for every task whose
    /// status ∈ {pending, retry}. Unchanged values produce no audit
    /// event (I4 / spec §4.3.2).
    pub fn apply_decay(&self, decay_type: DecayType, rate: f64) -> Result<usize, StoreError> {
        let status_all = self.read_all(Namespace::Status)?;
        let eligible: BTreeSet<String> = status_all
            .iter()
            .filter(|(_, v)| {
                v.get("status")
                    .and_then(Value::as_str)
                    .map(|s| s == "pending" || s == "retry")
                    .unwrap_or(false)
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut changed = 0usize;
        self.with_exclusive(Namespace::Tasks, |tasks_map| {
            for key in &eligible {
                let Some(entry_value) = tasks_map.get_mut(key) else {
                    continue;
                };
                let Some(entry) = entry_value.as_object_mut() else {
                    continue;
                };
                let Some(current) = entry.get("intensity").and_then(Value::as_f64) else {
                    continue;
                };
                let decayed = decay_intensity(current, decay_type, rate)?;
                if decayed.to_bits() == current.to_bits() {
                    continue;
                }
                let previous = entry.clone();
                entry.insert("intensity".into(), Value::from(decayed));
                entry.insert("updated_by".into(), Value::String(SYSTEM_DECAY.to_string()));
                entry.insert(
                    "timestamp".into(),
                    Value::String(crate::guardrails::utc_timestamp()),
                );
                let (fields_changed, previous_values) = diff_entries(Some(&previous), entry);
                let event = AuditEvent {
                    timestamp: entry
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    agent: SYSTEM_DECAY.to_string(),
                    pheromone_type: Namespace::Tasks.as_str().to_string(),
                    file_key: key.clone(),
                    action: AuditAction::Update,
                    fields_changed,
                    previous_values,
                };
                self.append_audit_event(&event)?;
                changed += 1;
            }
            Ok(())
        })?;
        Ok(changed)
    }

    /// `apply_decay_inhibition()`: decay inhibition for every status
    /// entry with `inhibition > 0`.
    pub fn apply_decay_inhibition(&self, rate: f64) -> Result<usize, StoreError> {
        let mut changed = 0usize;
        self.with_exclusive(Namespace::Status, |status_map| {
            for (key, entry_value) in status_map.iter_mut() {
                let Some(entry) = entry_value.as_object_mut() else {
                    continue;
                };
                let current = entry.get("inhibition").and_then(Value::as_f64).unwrap_or(0.0);
                if current <= 0.0 {
                    continue;
                }
                let decayed = decay_inhibition(current, rate)?;
                if decayed.to_bits() == current.to_bits() {
                    continue;
                }
                let previous = entry.clone();
                entry.insert("inhibition".into(), Value::from(decayed));
                entry.insert("updated_by".into(), Value::String(SYSTEM_DECAY.to_string()));
                entry.insert(
                    "timestamp".into(),
                    Value::String(crate::guardrails::utc_timestamp()),
                );
                let (fields_changed, previous_values) = diff_entries(Some(&previous), entry);
                let event = AuditEvent {
                    timestamp: entry
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    agent: SYSTEM_DECAY.to_string(),
                    pheromone_type: Namespace::Status.as_str().to_string(),
                    file_key: key.clone(),
                    action: AuditAction::Update,
                    fields_changed,
                    previous_values,
                };
                self.append_audit_event(&event)?;
                changed += 1;
            }
            Ok(())
        })?;
        Ok(changed)
    }

    /// Single atomic maintenance pass: TTL-release zombie locks, then
    /// requeue every `retry` entry to `pending`.
    pub fn maintain_status(
        &self,
        current_tick: i64,
        guardrails: &Guardrails,
    ) -> Result<MaintainReport, StoreError> {
        self.with_exclusive(Namespace::Status, |status_map| {
            let ttl_report = guardrails.enforce_scope_lock_ttl(status_map, current_tick);

            let mut retry_requeued = Vec::new();
            let retry_keys: Vec<String> = status_map
                .iter()
                .filter(|(_, v)| v.get("status").and_then(Value::as_str) == Some("retry"))
                .map(|(k, _)| k.clone())
                .collect();
            for key in retry_keys {
                if let Some(entry) = status_map.get_mut(&key).and_then(Value::as_object_mut) {
                    entry.insert("previous_status".into(), Value::String("retry".into()));
                    entry.insert("status".into(), Value::String("pending".into()));
                    entry.insert(
                        "updated_by".into(),
                        Value::String(SYSTEM_RETRY.to_string()),
                    );
                    entry.insert(
                        "timestamp".into(),
                        Value::String(crate::guardrails::utc_timestamp()),
                    );
                    retry_requeued.push(key);
                }
            }

            Ok(MaintainReport {
                ttl_released: ttl_report.released,
                retry_requeued,
            })
        })
    }
}

/// §4.3.3 finalizer for status writes/updates.
fn finalize_status_entry(
    guardrails: &Guardrails,
    agent: &str,
    previous: Option<&Map<String, Value>>,
    candidate: &mut Map<String, Value>,
) {
    let current_tick = candidate
        .remove("current_tick")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let previous_retry = previous
        .and_then(|p| p.get("retry_count"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let candidate_retry = candidate
        .get("retry_count")
        .and_then(Value::as_u64)
        .unwrap_or(previous_retry);
    let retry_count = previous_retry.max(candidate_retry);
    candidate.insert("retry_count".into(), Value::from(retry_count));

    let status = candidate.get("status").and_then(Value::as_str).map(str::to_string);
    if status.as_deref() == Some("in_progress") {
        Guardrails::acquire_scope_lock(candidate, agent, current_tick);
    } else {
        Guardrails::release_scope_lock(candidate, agent);
    }

    if guardrails.enforce_retry_limit(retry_count) {
        candidate.insert("status".into(), Value::String("skipped".into()));
    }
}

/// Diff two entries by key union; returns (changed field names, map of
/// previous values for those fields that existed previously).
fn diff_entries(
    previous: Option<&Map<String, Value>>,
    candidate: &Map<String, Value>,
) -> (Vec<String>, std::collections::BTreeMap<String, Value>) {
    let empty = Map::new();
    let previous = previous.unwrap_or(&empty);
    let mut keys: BTreeSet<&String> = previous.keys().collect();
    keys.extend(candidate.keys());

    let mut changed = Vec::new();
    let mut previous_values = std::collections::BTreeMap::new();
    for key in keys {
        let old = previous.get(key);
        let new = candidate.get(key);
        if old != new {
            changed.push(key.clone());
            if let Some(o) = old {
                previous_values.insert(key.clone(), o.clone());
            }
        }
    }
    (changed, previous_values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, PheromoneStore) {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        (dir, store)
    }

    fn guardrails() -> Guardrails {
        Guardrails::new(100_000, 3, 10)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, store) = test_store();
        let g = guardrails();
        let mut data = Map::new();
        data.insert("intensity".into(), json!(0.7));
        data.insert("analysis_source".into(), json!("regex"));
        data.insert("file_kind".into(), json!("python"));
        store.write(Namespace::Tasks, "a.py", data, "scout", &g).unwrap();

        let read = store.read_one(Namespace::Tasks, "a.py").unwrap().unwrap();
        assert_eq!(read.get("intensity").unwrap(), 0.7);
        assert!(read.get("timestamp").is_some());
        assert_eq!(read.get("created_by").unwrap(), "scout");
    }

    #[test]
    fn write_emits_exactly_one_audit_event() {
        let (_dir, store) = test_store();
        let g = guardrails();
        let mut data = Map::new();
        data.insert("status".into(), json!("pending"));
        data.insert("retry_count".into(), json!(0));
        data.insert("inhibition".into(), json!(0.0));
        store.write(Namespace::Status, "a.py", data, "scout", &g).unwrap();

        let log = fs::read_to_string(store.audit_log_path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["file_key"], "a.py");
        assert_eq!(event["pheromone_type"], "status");
    }

    #[test]
    fn retry_count_never_decreases_on_update() {
        let (_dir, store) = test_store();
        let g = guardrails();
        let mut data = Map::new();
        data.insert("status".into(), json!("retry"));
        data.insert("retry_count".into(), json!(2));
        store.write(Namespace::Status, "a.py", data, "validator", &g).unwrap();

        let mut fields = Map::new();
        fields.insert("status".into(), json!("pending"));
        fields.insert("retry_count".into(), json!(0));
        store.update(Namespace::Status, "a.py", "system", fields, &g).unwrap();

        let read = store.read_one(Namespace::Status, "a.py").unwrap().unwrap();
        assert_eq!(read.get("retry_count").unwrap(), 2);
    }

    #[test]
    fn scope_lock_blocks_other_agent_writes() {
        let (_dir, store) = test_store();
        let g = guardrails();
        let mut data = Map::new();
        data.insert("status".into(), json!("in_progress"));
        data.insert("current_tick".into(), json!(0));
        store.write(Namespace::Status, "a.py", data, "transformer", &g).unwrap();

        let mut quality = Map::new();
        quality.insert("confidence".into(), json!(0.5));
        let result = store.write(Namespace::Quality, "a.py", quality, "tester", &g);
        assert!(result.is_err());
    }

    #[test]
    fn retry_limit_coerces_to_skipped() {
        let (_dir, store) = test_store();
        let g = Guardrails::new(100_000, 1, 10);
        let mut data = Map::new();
        data.insert("status".into(), json!("retry"));
        data.insert("retry_count".into(), json!(2));
        store.write(Namespace::Status, "a.py", data, "validator", &g).unwrap();

        let read = store.read_one(Namespace::Status, "a.py").unwrap().unwrap();
        assert_eq!(read.get("status").unwrap(), "skipped");
    }

    #[test]
    fn decay_skips_non_eligible_status_and_emits_no_event_at_fixed_point() {
        let (_dir, store) = test_store();
        let g = guardrails();
        let mut status = Map::new();
        status.insert("status".into(), json!("validated"));
        store.write(Namespace::Status, "a.py", status, "validator", &g).unwrap();

        let mut tasks = Map::new();
        tasks.insert("intensity".into(), json!(0.0));
        store.write(Namespace::Tasks, "a.py", tasks, "scout", &g).unwrap();

        let changed = store.apply_decay(DecayType::Exponential, 0.5).unwrap();
        assert_eq!(changed, 0);
    }

    #[test]
    fn maintain_status_requeues_retry_to_pending() {
        let (_dir, store) = test_store();
        let g = guardrails();
        let mut data = Map::new();
        data.insert("status".into(), json!("retry"));
        data.insert("retry_count".into(), json!(1));
        store.write(Namespace::Status, "a.py", data, "validator", &g).unwrap();

        let report = store.maintain_status(5, &g).unwrap();
        assert_eq!(report.retry_requeued, vec!["a.py".to_string()]);
        let read = store.read_one(Namespace::Status, "a.py").unwrap().unwrap();
        assert_eq!(read.get("status").unwrap(), "pending");
    }

    #[test]
    fn concurrent_writers_produce_exactly_n_times_m_keys() {
        use std::thread;
        let dir = tempdir().unwrap();
        let base = dir.path().join("pheromones");
        let _ = PheromoneStore::new(&base).unwrap();
        let g = guardrails();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let base = base.clone();
                let g = g;
                thread::spawn(move || {
                    let store = PheromoneStore::new(&base).unwrap();
                    for i in 0..12 {
                        let mut data = Map::new();
                        data.insert("intensity".into(), json!(0.5));
                        data.insert("analysis_source".into(), json!("regex"));
                        data.insert("file_kind".into(), json!("python"));
                        store
                            .write(
                                Namespace::Tasks,
                                &format!("worker{worker}_file{i}.py"),
                                data,
                                "scout",
                                &g,
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = store_for(&base).read_all(Namespace::Tasks).unwrap();
        assert_eq!(all.len(), 48);
    }

    fn store_for(base: &Path) -> PheromoneStore {
        PheromoneStore::new(base).unwrap()
    }
}
