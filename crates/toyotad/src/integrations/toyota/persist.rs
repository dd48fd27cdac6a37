use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use toyota_api::Tokens;
use tracing::debug;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Persisted {
    #[serde(default)]
    tokens: Option<Tokens>,

    /// Unix seconds of the last server-side status refresh
    #[serde(default)]
    last_refreshed_at: Option<i64>,
}

/// JSON file carrying tokens and refresh bookkeeping across restarts.
///
/// Write failures are logged, never returned: losing the file only costs a
/// fresh login. Writes go through `tokio::fs` and are serialised, so the file
/// always holds the latest snapshot.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    data: Mutex<Persisted>,
    write: tokio::sync::Mutex<()>,
}

impl StateFile {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse state file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Persisted::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file {}", path.display()))
            }
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
            write: tokio::sync::Mutex::new(()),
        })
    }

    pub fn tokens(&self) -> Option<Tokens> {
        self.lock().tokens.clone()
    }

    pub fn last_refreshed_at(&self) -> Option<i64> {
        self.lock().last_refreshed_at
    }

    pub async fn set_tokens(&self, tokens: &Tokens) {
        self.update(|data| data.tokens = Some(tokens.clone())).await;
    }

    pub async fn set_last_refreshed_at(&self, at: i64) {
        self.update(|data| data.last_refreshed_at = Some(at)).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Persisted> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn update(&self, apply: impl FnOnce(&mut Persisted)) {
        // Snapshot under the write lock so saves land in update order.
        let _write = self.write.lock().await;
        let snapshot = {
            let mut data = self.lock();
            apply(&mut data);
            data.clone()
        };
        match self.save(&snapshot).await {
            Ok(()) => debug!("Saved state to {}", self.path.display()),
            Err(e) => warn!("Failed to save state to {}: {:#}", self.path.display(), e),
        }
    }

    async fn save(&self, data: &Persisted) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
