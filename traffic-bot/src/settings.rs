//! Per-user display timezone, persisted as a flat JSON map
//! `{ "<user id>": <hours> }`.
//!
//! The store is the only owner of the file. Writers are serialised by
//! `writer`; readers see the last snapshot that fully reached disk.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::SettingsError;
use crate::timezone::validate_offset;

type TimezoneMap = BTreeMap<String, i32>;

pub struct SettingsStore {
    path: PathBuf,
    snapshot: RwLock<TimezoneMap>,
    writer: Mutex<()>,
}

fn io_error(path: &Path, source: io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl SettingsStore {
    /// Load the map from `path`. A missing file starts an empty map; a file
    /// that exists but does not parse is an error. Offsets outside
    /// `[-12, +14]` are dropped.
    pub async fn open(path: PathBuf) -> Result<Self, SettingsError> {
        let mut map: TimezoneMap = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => TimezoneMap::new(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No settings file at {path:?}, starting empty");
                TimezoneMap::new()
            }
            Err(e) => return Err(io_error(&path, e)),
        };

        map.retain(|user, offset| {
            let valid = validate_offset(*offset).is_ok();
            if !valid {
                warn!("Dropping stored offset {offset} for user {user}: out of range");
            }
            valid
        });
        debug!("Loaded {} timezone preferences", map.len());

        Ok(Self {
            path,
            snapshot: RwLock::new(map),
            writer: Mutex::new(()),
        })
    }

    /// Stored offset for the user, UTC when there is none.
    pub async fn get_timezone(&self, user_id: &str) -> i32 {
        self.stored_timezone(user_id).await.unwrap_or(0)
    }

    pub async fn stored_timezone(&self, user_id: &str) -> Option<i32> {
        self.snapshot.read().await.get(user_id).copied()
    }

    pub async fn set_timezone(&self, user_id: &str, offset_hours: i32) -> Result<(), SettingsError> {
        let offset_hours = validate_offset(offset_hours)?;

        let _guard = self.writer.lock().await;

        let mut updated = self.snapshot.read().await.clone();
        updated.insert(user_id.to_owned(), offset_hours);

        self.persist(&updated).await?;
        *self.snapshot.write().await = updated;

        info!("User {user_id} timezone set to {offset_hours:+}");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "user_timezones".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write to a sibling temp file and rename it over the target, so the
    /// visible file is always either the old or the new full map.
    async fn persist(&self, map: &TimezoneMap) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(map).map_err(|source| SettingsError::Parse {
            path: self.path.display().to_string(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let temp = self.temp_path();
        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                debug!("Could not remove {temp:?}: {cleanup}");
            }
            return Err(io_error(&self.path, e));
        }

        Ok(())
    }
}
