//! Operational vs training database contexts, snapshot backup and restore.
//!
//! Exactly one store is open at a time.  Every transition closes the current
//! handle before opening the next one, and all transitions take `&mut self`,
//! so nothing else can hold the store while a switch or restore is running.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AirConfig;
use crate::error::{AirError, Result, ResultExt as _};
use crate::records::BackupRecord;
use crate::scenarios::Scenario;
use crate::store::LedgerStore;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseContext {
    Operational,
    Training(Scenario),
}

impl DatabaseContext {
    /// `operational` or `training:<scenario>`.
    pub fn label(&self) -> String {
        match self {
            Self::Operational => "operational".to_string(),
            Self::Training(sc) => format!("training:{}", sc.id()),
        }
    }

    pub fn is_training(&self) -> bool {
        matches!(self, Self::Training(_))
    }
}

// ---------------------------------------------------------------------------
// Snapshot copier trait
// ---------------------------------------------------------------------------

/// Copies a snapshot file over the live database during restore.
pub trait SnapshotCopier {
    fn copy_snapshot(&self, from: &Path, to: &Path) -> std::io::Result<()>;
}

/// Plain filesystem copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCopier;

impl SnapshotCopier for FsCopier {
    fn copy_snapshot(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        std::fs::copy(from, to).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Context manager
// ---------------------------------------------------------------------------

pub struct ContextManager {
    operational_db: PathBuf,
    backups_dir: PathBuf,
    training_dir: PathBuf,
    operator: String,
    context: DatabaseContext,
    store: Option<LedgerStore>,
    copier: Box<dyn SnapshotCopier>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("context", &self.context)
            .field("operational_db", &self.operational_db)
            .field("backups_dir", &self.backups_dir)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ContextManager {
    /// Open the operational store named in `cfg`.
    pub fn open(cfg: &AirConfig) -> Result<Self> {
        let store = LedgerStore::open(&cfg.paths.operational_db)?;
        info!(path = %cfg.paths.operational_db.display(), "operational store opened");
        Ok(Self {
            operational_db: cfg.paths.operational_db.clone(),
            backups_dir: cfg.paths.backups_dir.clone(),
            training_dir: cfg.paths.training_dir.clone(),
            operator: cfg.operator.name.clone(),
            context: DatabaseContext::Operational,
            store: Some(store),
            copier: Box::new(FsCopier),
        })
    }

    /// Replace the file copier used by [`restore`](Self::restore).
    pub fn with_copier(mut self, copier: impl SnapshotCopier + 'static) -> Self {
        self.copier = Box::new(copier);
        self
    }

    pub fn context(&self) -> DatabaseContext {
        self.context
    }

    pub fn is_training(&self) -> bool {
        self.context.is_training()
    }

    pub fn label(&self) -> String {
        self.context.label()
    }

    pub fn current_database_path(&self) -> PathBuf {
        match self.context {
            DatabaseContext::Operational => self.operational_db.clone(),
            DatabaseContext::Training(sc) => self.training_db_path(sc),
        }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn training_db_path(&self, scenario: Scenario) -> PathBuf {
        self.training_dir
            .join(format!("AIR_Training_{}.sqlite", scenario.id()))
    }

    /// The active store.
    pub fn store(&self) -> Result<&LedgerStore> {
        self.store
            .as_ref()
            .ok_or_else(|| AirError::InvalidContext("no store is open".into()))
    }

    pub fn store_mut(&mut self) -> Result<&mut LedgerStore> {
        self.store
            .as_mut()
            .ok_or_else(|| AirError::InvalidContext("no store is open".into()))
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            store.close()?;
        }
        Ok(())
    }

    fn reopen_operational(&mut self) -> Result<()> {
        self.store = Some(LedgerStore::open(&self.operational_db)?);
        self.context = DatabaseContext::Operational;
        Ok(())
    }

    fn require_operational(&self, op: &str) -> Result<()> {
        if self.context.is_training() {
            return Err(AirError::InvalidContext(format!(
                "{op} is only available in the operational context (active: {})",
                self.context.label()
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Context switching
    // -----------------------------------------------------------------------

    /// Switch into a fresh sandbox for `scenario`.  Any previous sandbox
    /// file for the same scenario is discarded.  If the sandbox cannot be
    /// built, the operational store is reopened and the error returned.
    pub fn enter_training(&mut self, scenario: Scenario) -> Result<()> {
        self.close_current()?;
        match self.open_training(scenario) {
            Ok(store) => {
                self.store = Some(store);
                self.context = DatabaseContext::Training(scenario);
                info!(scenario = scenario.id(), "entered training context");
                Ok(())
            }
            Err(e) => {
                warn!(scenario = scenario.id(), error = %e, "training setup failed; reopening operational store");
                self.reopen_operational()?;
                Err(e)
            }
        }
    }

    fn open_training(&self, scenario: Scenario) -> Result<LedgerStore> {
        let path = self.training_db_path(scenario);
        std::fs::create_dir_all(&self.training_dir)
            .ctx_store(&format!("create training dir {}", self.training_dir.display()))?;
        if path.exists() {
            std::fs::remove_file(&path)
                .ctx_store(&format!("remove old sandbox {}", path.display()))?;
        }
        let store = LedgerStore::open(&path)?;
        scenario.seed(&store)?;
        Ok(store)
    }

    /// Close the sandbox (leaving its file on disk) and reopen the
    /// operational store.
    pub fn return_to_operational(&mut self) -> Result<()> {
        self.close_current()?;
        self.reopen_operational()?;
        info!("returned to operational context");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.require_operational("listing backups")?;
        self.store()?.list_backups()
    }

    pub fn backup_path(&self, record: &BackupRecord) -> PathBuf {
        self.backups_dir.join(&record.filename)
    }

    fn unique_snapshot_name(&self, stamp: &str) -> String {
        let base = format!("backup_{stamp}.db");
        if !self.backups_dir.join(&base).exists() {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("backup_{stamp}_{n}.db");
            if !self.backups_dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Snapshot the operational store and record the backup in its catalogue.
    pub fn backup(&mut self, title: &str, description: &str) -> Result<BackupRecord> {
        self.require_operational("backup")?;
        std::fs::create_dir_all(&self.backups_dir)
            .ctx_backup(&format!("create backups dir {}", self.backups_dir.display()))?;

        let now = util::now_local();
        let filename = self.unique_snapshot_name(&util::file_timestamp(now));
        let dest = self.backups_dir.join(&filename);
        let store = self.store()?;

        if let Err(e) = store.snapshot_to(&dest) {
            let _ = std::fs::remove_file(&dest);
            return Err(e);
        }
        let record = match store.insert_backup_record(
            title,
            description,
            &filename,
            &util::display_timestamp(now),
            &self.operator,
        ) {
            Ok(r) => r,
            Err(e) => {
                let _ = std::fs::remove_file(&dest);
                return Err(e);
            }
        };
        info!(id = record.id, file = %dest.display(), "backup created");
        Ok(record)
    }

    /// Replace the operational store with the snapshot of backup `id`.
    ///
    /// The live file is renamed to `<db>.old` before the copy and renamed
    /// back if anything fails, so a failed restore leaves the store exactly as
    /// it was, reopened.  The backup catalogue is carried across into the
    /// restored store.
    pub fn restore(&mut self, id: i64) -> Result<()> {
        self.require_operational("restore")?;
        let store = self.store()?;
        let record = store.backup_record(id)?;
        let snapshot = self.backup_path(&record);
        if !snapshot.exists() {
            return Err(AirError::NotFound(format!(
                "snapshot file {} for backup {id}",
                snapshot.display()
            )));
        }
        let catalogue = store.list_backups()?;

        self.close_current()?;
        let live = self.operational_db.clone();
        let old = util::with_old_suffix(&live);

        if let Err(e) = set_aside(&live, &old) {
            self.reopen_operational()?;
            return Err(e);
        }
        debug!(live = %live.display(), old = %old.display(), "live store set aside");

        match self.install_snapshot(&snapshot, &live, &catalogue) {
            Ok(()) => {
                self.context = DatabaseContext::Operational;
                info!(id, file = %snapshot.display(), "backup restored");
                Ok(())
            }
            Err(e) => {
                warn!(id, error = %e, "restore failed; rolling back");
                self.store = None;
                if live.exists() {
                    std::fs::remove_file(&live)
                        .ctx_backup(&format!("remove partial copy {}", live.display()))?;
                }
                std::fs::rename(&old, &live)
                    .ctx_backup(&format!("move {} back", old.display()))?;
                self.reopen_operational()?;
                Err(e)
            }
        }
    }

    fn install_snapshot(
        &mut self,
        snapshot: &Path,
        live: &Path,
        catalogue: &[BackupRecord],
    ) -> Result<()> {
        self.copier
            .copy_snapshot(snapshot, live)
            .ctx_backup(&format!("copy {} -> {}", snapshot.display(), live.display()))?;
        let mut store = LedgerStore::open(live)?;
        if let Err(e) = store.replace_backup_catalogue(catalogue) {
            let _ = store.close();
            return Err(e);
        }
        self.store = Some(store);
        Ok(())
    }

    /// Remove a backup's catalogue row and, best effort, its snapshot file.
    pub fn delete_backup(&mut self, id: i64) -> Result<()> {
        self.require_operational("deleting backups")?;
        let store = self.store()?;
        let record = store.backup_record(id)?;
        let path = self.backup_path(&record);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(file = %path.display(), "snapshot file removed"),
            Err(e) => warn!(file = %path.display(), error = %e, "snapshot file not removed"),
        }
        store.delete_backup_record(id)?;
        info!(id, "backup deleted");
        Ok(())
    }
}

/// Move `live` to `old`, discarding any earlier `old`.
fn set_aside(live: &Path, old: &Path) -> Result<()> {
    if old.exists() {
        std::fs::remove_file(old).ctx_backup(&format!("remove {}", old.display()))?;
    }
    std::fs::rename(live, old).ctx_backup(&format!(
        "rename {} -> {}",
        live.display(),
        old.display()
    ))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
