//! Persistence worker: a key/value settings store backed by a JSON file.
//!
//! The store itself is also used directly by the supervisor's
//! `--set-password` path, which persists without going through the worker.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    channel::Payload,
    constants::REPLY_OK,
    dispatch::{CommandTable, Service},
    error::{HandlerError, StorageError},
    worker::Links,
};

/// One persisted setting with its last modification time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    /// The stored value.
    pub value: serde_json::Value,
    /// When the value was last written.
    pub updated_at: DateTime<Utc>,
}

/// Write-through settings store over `settings.json` in the state directory.
pub struct SettingsStore {
    path: PathBuf,
    values: BTreeMap<String, Setting>,
}

impl SettingsStore {
    /// Opens (or creates) the store under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, StorageError> {
        let path = state_dir.join("settings.json");
        let values = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key).map(|setting| &setting.value)
    }

    /// Stores `value` under `key` and flushes to disk.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.values.insert(
            key.to_string(),
            Setting {
                value,
                updated_at: Utc::now(),
            },
        );
        self.save()
    }

    fn save(&self) -> Result<(), StorageError> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }
}

/// The persistence worker's application half.
pub struct StorageService {
    store: SettingsStore,
}

impl StorageService {
    /// Opens the settings store under `state_dir`.
    pub fn new(state_dir: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            store: SettingsStore::open(state_dir)?,
        })
    }
}

fn init(
    svc: &mut StorageService,
    _links: &mut Links,
    _sender: &str,
    _payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    info!("settings store ready at {:?}", svc.store.path());
    Ok(None)
}

/// `set_setting [key, value]` → `"ok"`.
fn set_setting(
    svc: &mut StorageService,
    _links: &mut Links,
    _sender: &str,
    payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    let Some((Payload::Text(key), value)) = payload.into_pair() else {
        return Err(HandlerError::Message(
            "set_setting expects [key, value]".to_string(),
        ));
    };

    let json = payload_to_json(&value)
        .ok_or_else(|| StorageError::UnstorableValue(key.clone()))?;
    svc.store.set(&key, json)?;
    Ok(Some(Payload::text(REPLY_OK)))
}

/// `get_setting key` → `[key, value]` (value is `None` when unset).
fn get_setting(
    svc: &mut StorageService,
    _links: &mut Links,
    _sender: &str,
    payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    let Payload::Text(key) = payload else {
        return Err(HandlerError::Message("get_setting expects a key".to_string()));
    };

    let value = svc
        .store
        .get(&key)
        .map(json_to_payload)
        .unwrap_or(Payload::None);
    Ok(Some(Payload::List(vec![Payload::Text(key), value])))
}

/// `set_password hash` → `"ok"`. The payload is already hashed.
fn set_password(
    svc: &mut StorageService,
    _links: &mut Links,
    _sender: &str,
    payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    let Payload::Text(hashed) = payload else {
        return Err(HandlerError::Message(
            "set_password expects the hashed value".to_string(),
        ));
    };

    svc.store.set("password", serde_json::Value::String(hashed))?;
    Ok(Some(Payload::text(REPLY_OK)))
}

impl Service for StorageService {
    fn commands() -> CommandTable<Self> {
        CommandTable::new()
            .register("init", init)
            .register("set_setting", set_setting)
            .register("get_setting", get_setting)
            .register("set_password", set_password)
    }
}

/// Converts a payload into a JSON value. Endpoints (and anything containing
/// one) cannot be persisted.
fn payload_to_json(payload: &Payload) -> Option<serde_json::Value> {
    match payload {
        Payload::None => Some(serde_json::Value::Null),
        Payload::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Payload::Int(n) => Some(serde_json::Value::from(*n)),
        Payload::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
        Payload::Text(s) => Some(serde_json::Value::String(s.clone())),
        Payload::List(items) => items
            .iter()
            .map(payload_to_json)
            .collect::<Option<Vec<_>>>()
            .map(serde_json::Value::Array),
        Payload::Map(entries) => entries
            .iter()
            .map(|(k, v)| payload_to_json(v).map(|json| (k.clone(), json)))
            .collect::<Option<serde_json::Map<_, _>>>()
            .map(serde_json::Value::Object),
        Payload::Endpoint(_) => None,
    }
}

/// Converts a stored JSON value back into a payload.
fn json_to_payload(value: &serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Null => Payload::None,
        serde_json::Value::Bool(b) => Payload::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Payload::Int(i),
            None => Payload::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Payload::Text(s.clone()),
        serde_json::Value::Array(items) => {
            Payload::List(items.iter().map(json_to_payload).collect())
        }
        serde_json::Value::Object(entries) => Payload::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_payload(v)))
                .collect(),
        ),
    }
}
