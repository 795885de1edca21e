//! The migration coordinator.
//!
//! [`Migration`] is shared by every connection to one database. It resolves
//! each table name to its [`MigrationInfo`] at most once, counts the live
//! statements that depend on each info, and drives migration forward one
//! unit of work per [`Migration::step`] call.
//!
//! Infos are handed out as `Arc`s, so an info stays valid for as long as any
//! statement holds it, even after the coordinator has finished with it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::info::{is_builtin_table, MigrationInfo, MigrationUserInfo, TableColumns};

/// Collaborator that answers schema questions while an info is initialized.
pub trait InfoInitializer {
    /// Path of the database the coordinator belongs to.
    fn database_path(&self) -> &str;

    /// Whether the declared source table exists. Sources without a rowid are
    /// rejected with an error.
    fn source_table_exists(&self, user_info: &MigrationUserInfo) -> Result<bool>;

    /// Columns of the destination table; empty if it does not exist yet.
    fn columns_of_user_info(&self, user_info: &MigrationUserInfo) -> Result<TableColumns>;
}

/// Collaborator that performs the I/O of [`Migration::step`].
pub trait Stepper: InfoInitializer {
    /// Every user table of the database.
    fn all_tables(&mut self) -> Result<BTreeSet<String>>;

    /// Drop the source table of a fully migrated info.
    fn drop_source_table(&mut self, info: &MigrationInfo) -> Result<()>;

    /// Copy a bounded batch of rows. Returns `true` once the source is empty.
    fn migrate_rows(&mut self, info: &MigrationInfo) -> Result<bool>;
}

/// Notified when a table, or the whole database, finishes migrating.
pub trait MigrationEvent: Send + Sync {
    /// `Some(info)` after a source table is dropped, `None` once nothing is left.
    fn did_migrate(&self, info: Option<&MigrationInfo>);
}

impl<F> MigrationEvent for F
where
    F: Fn(Option<&MigrationInfo>) + Send + Sync,
{
    fn did_migrate(&self, info: Option<&MigrationInfo>) {
        self(info)
    }
}

/// Classifies a table by setting its source, or leaving it unset.
///
/// The filter runs while the coordinator is locked and must not call back
/// into it.
pub type Filter = Arc<dyn Fn(&mut MigrationUserInfo) + Send + Sync>;

#[derive(Default)]
struct State {
    filter: Option<Filter>,
    event: Option<Arc<dyn MigrationEvent>>,
    /// Tables with rows left to copy.
    migratings: BTreeMap<String, Arc<MigrationInfo>>,
    /// Live references per table. Entries are removed when they reach zero.
    referenceds: HashMap<String, usize>,
    /// Copied and unreferenced; the source table is waiting to be dropped.
    dumpster: BTreeMap<String, Arc<MigrationInfo>>,
    /// Every resolved table. `None` means the table does not migrate.
    filted: HashMap<String, Option<Arc<MigrationInfo>>>,
    /// Tables that will be created and need migrating once they exist.
    hints: BTreeSet<String>,
    hints_version: u64,
    table_acquired: bool,
    migrated: bool,
    /// Bumped on every purge so stale guards and results are ignored.
    epoch: u64,
}

impl State {
    fn purge(&mut self) {
        self.migratings.clear();
        self.referenceds.clear();
        self.dumpster.clear();
        self.filted.clear();
        self.hints.clear();
        self.hints_version += 1;
        self.table_acquired = false;
        self.migrated = false;
        self.epoch += 1;
    }

    fn is_migrating(&self, info: &Arc<MigrationInfo>) -> bool {
        self.migratings
            .get(info.table())
            .is_some_and(|migrating| Arc::ptr_eq(migrating, info))
    }

    fn retain(&mut self, info: &Arc<MigrationInfo>) {
        debug_assert!(!self.dumpster.contains_key(info.table()));
        *self.referenceds.entry(info.table().to_string()).or_insert(0) += 1;
    }

    fn release(&mut self, info: &Arc<MigrationInfo>) {
        let table = info.table();
        let remaining = match self.referenceds.get_mut(table) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining > 0 {
            return;
        }
        self.referenceds.remove(table);
        if !self.migratings.contains_key(table) {
            self.dumpster.insert(table.to_string(), Arc::clone(info));
        }
    }

    fn mark_as_migrated(&mut self, info: &Arc<MigrationInfo>) {
        if !self.is_migrating(info) {
            return;
        }
        let table = info.table();
        self.migratings.remove(table);
        if !self.referenceds.contains_key(table) {
            self.dumpster.insert(table.to_string(), Arc::clone(info));
        }
    }
}

/// Result of looking a table up without initializing it.
#[derive(Debug)]
pub enum InfoLookup {
    /// The table has never been classified.
    Unresolved,
    /// The table does not migrate, or has finished migrating.
    NotMigrating,
    /// The table is migrating; the guard keeps its source from being dropped.
    Migrating(RecyclableInfo),
}

/// A counted reference to a migrating table's info.
///
/// While any guard for a table is alive its source table is never dropped.
/// Dropping the last guard of a fully copied table queues the drop.
pub struct RecyclableInfo {
    info: Arc<MigrationInfo>,
    state: Weak<RwLock<State>>,
    epoch: u64,
}

impl RecyclableInfo {
    pub fn info(&self) -> &Arc<MigrationInfo> {
        &self.info
    }
}

impl Deref for RecyclableInfo {
    type Target = MigrationInfo;

    fn deref(&self) -> &Self::Target {
        &self.info
    }
}

impl Clone for RecyclableInfo {
    fn clone(&self) -> Self {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.write();
            if state.epoch == self.epoch {
                state.retain(&self.info);
            }
        }
        Self {
            info: Arc::clone(&self.info),
            state: Weak::clone(&self.state),
            epoch: self.epoch,
        }
    }
}

impl Drop for RecyclableInfo {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.write();
            if state.epoch == self.epoch {
                state.release(&self.info);
            }
        }
    }
}

impl fmt::Debug for RecyclableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecyclableInfo")
            .field("table", &self.info.table())
            .field("source_table", &self.info.source_table())
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Point-in-time view of the coordinator, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    pub migrating: Vec<String>,
    pub pending_drop: Vec<String>,
    pub referenced: Vec<String>,
    pub hinted: Vec<String>,
    pub migrated: bool,
}

enum Resolution {
    NotMigrating,
    WillBeCreated,
    Migrating(MigrationInfo),
}

/// Coordinates the migration of one database.
pub struct Migration {
    state: Arc<RwLock<State>>,
    step_lock: Mutex<()>,
}

impl Default for Migration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("status", &self.status())
            .finish()
    }
}

impl Migration {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            step_lock: Mutex::new(()),
        }
    }

    /// Install or remove the table filter. Every cached decision is dropped.
    pub fn filter_table(&self, filter: Option<Filter>) {
        let mut state = self.state.write();
        state.purge();
        state.filter = filter;
    }

    pub fn set_event(&self, event: Option<Arc<dyn MigrationEvent>>) {
        self.state.write().event = event;
    }

    /// Whether a filter is installed.
    pub fn should_migrate(&self) -> bool {
        self.state.read().filter.is_some()
    }

    /// Look a table up without classifying it.
    pub fn get_info(&self, table: &str) -> InfoLookup {
        let mut state = self.state.write();
        let info = match state.filted.get(table) {
            None => return InfoLookup::Unresolved,
            Some(None) => return InfoLookup::NotMigrating,
            Some(Some(info)) => Arc::clone(info),
        };
        if !state.is_migrating(&info) {
            return InfoLookup::NotMigrating;
        }
        state.retain(&info);
        InfoLookup::Migrating(RecyclableInfo {
            info,
            state: Arc::downgrade(&self.state),
            epoch: state.epoch,
        })
    }

    /// Look a table up, classifying it first if needed.
    pub fn get_or_init_info<I>(
        &self,
        initializer: &I,
        table: &str,
    ) -> Result<Option<RecyclableInfo>>
    where
        I: InfoInitializer + ?Sized,
    {
        match self.get_info(table) {
            InfoLookup::Migrating(info) => return Ok(Some(info)),
            InfoLookup::NotMigrating => return Ok(None),
            InfoLookup::Unresolved => {}
        }
        self.init_info(initializer, table)?;
        match self.get_info(table) {
            InfoLookup::Migrating(info) => Ok(Some(info)),
            _ => Ok(None),
        }
    }

    /// Classify a table that is about to be created.
    ///
    /// If the filter gives it a source, it is remembered so that the next
    /// table enumeration picks it up once it exists.
    pub fn hint_that_table_will_be_created<I>(&self, initializer: &I, table: &str) -> Result<()>
    where
        I: InfoInitializer + ?Sized,
    {
        self.init_info(initializer, table)
    }

    /// Whether `info` is the current info of a table that is still migrating.
    pub fn is_migrating(&self, info: &Arc<MigrationInfo>) -> bool {
        self.state.read().is_migrating(info)
    }

    /// Whether no migration work of any kind remains.
    pub fn is_migrated(&self) -> bool {
        self.state.read().migrated
    }

    /// Paths of every source database still in use.
    pub fn paths_of_source_databases(&self) -> BTreeSet<String> {
        let state = self.state.read();
        let referenced = state
            .referenceds
            .keys()
            .filter_map(|table| state.filted.get(table).and_then(|info| info.as_ref()));
        state
            .migratings
            .values()
            .chain(state.dumpster.values())
            .chain(referenced)
            .filter(|info| info.is_cross_database())
            .map(|info| info.source_database().to_string())
            .collect()
    }

    pub fn status(&self) -> MigrationStatus {
        let state = self.state.read();
        let mut referenced: Vec<String> = state.referenceds.keys().cloned().collect();
        referenced.sort();
        MigrationStatus {
            migrating: state.migratings.keys().cloned().collect(),
            pending_drop: state.dumpster.keys().cloned().collect(),
            referenced,
            hinted: state.hints.iter().cloned().collect(),
            migrated: state.migrated,
        }
    }

    fn init_info<I>(&self, initializer: &I, table: &str) -> Result<()>
    where
        I: InfoInitializer + ?Sized,
    {
        let (user_info, epoch) = {
            let state = self.state.read();
            if state.filted.contains_key(table) {
                return Ok(());
            }
            let Some(filter) = state.filter.as_ref() else {
                return Ok(());
            };
            let mut user_info = MigrationUserInfo::new(initializer.database_path(), table);
            if !is_builtin_table(table) {
                filter(&mut user_info);
            }
            (user_info, state.epoch)
        };

        let resolution = if !user_info.should_migrate()
            || !initializer.source_table_exists(&user_info)?
        {
            Resolution::NotMigrating
        } else {
            let columns = initializer.columns_of_user_info(&user_info)?;
            if columns.columns.is_empty() {
                Resolution::WillBeCreated
            } else {
                Resolution::Migrating(MigrationInfo::new(user_info, columns))
            }
        };

        let mut state = self.state.write();
        if state.epoch != epoch || state.filted.contains_key(table) {
            return Ok(());
        }
        match resolution {
            Resolution::NotMigrating => {
                state.filted.insert(table.to_string(), None);
                state.hints.remove(table);
            }
            Resolution::WillBeCreated => {
                state.migrated = false;
                if state.hints.insert(table.to_string()) {
                    debug!(table, "table will be created before migrating");
                    state.hints_version += 1;
                    state.table_acquired = false;
                }
            }
            Resolution::Migrating(info) => {
                debug!(
                    table,
                    source_table = info.source_table(),
                    source_database = info.source_database(),
                    "table is migrating"
                );
                let info = Arc::new(info);
                state.migrated = false;
                state
                    .migratings
                    .insert(table.to_string(), Arc::clone(&info));
                state.filted.insert(table.to_string(), Some(info));
                state.hints.remove(table);
            }
        }
        Ok(())
    }

    /// Perform one unit of migration work.
    ///
    /// Returns `true` once everything has been migrated. A failed step
    /// leaves the coordinator as it was, so the same work is retried by the
    /// next call. Concurrent calls are serialized.
    #[instrument(skip(self, stepper))]
    pub fn step<S>(&self, stepper: &mut S) -> Result<bool>
    where
        S: Stepper + ?Sized,
    {
        let _serial = self.step_lock.lock();
        loop {
            if self.try_drop_unreferenced_table(stepper)? {
                return Ok(false);
            }
            if self.try_migrate_rows(stepper)? {
                return Ok(false);
            }
            if self.try_acquire_tables(stepper)? {
                continue;
            }
            return Ok(self.try_finish());
        }
    }

    fn try_drop_unreferenced_table<S>(&self, stepper: &mut S) -> Result<bool>
    where
        S: Stepper + ?Sized,
    {
        let (info, epoch) = {
            let state = self.state.read();
            match state.dumpster.values().next() {
                Some(info) => (Arc::clone(info), state.epoch),
                None => return Ok(false),
            }
        };

        stepper.drop_source_table(&info)?;

        let event = {
            let mut state = self.state.write();
            // A purge meanwhile means the drop belongs to a migration that no
            // longer exists; it is not reported.
            let current = state.epoch == epoch
                && state
                    .dumpster
                    .get(info.table())
                    .is_some_and(|dumped| Arc::ptr_eq(dumped, &info));
            if !current {
                debug!(table = info.table(), "dropped source of a purged migration");
                return Ok(true);
            }
            state.dumpster.remove(info.table());
            state.event.clone()
        };
        info!(
            table = info.table(),
            source_table = info.source_table(),
            source_database = info.source_database(),
            "table migrated"
        );
        if let Some(event) = event {
            event.did_migrate(Some(&info));
        }
        Ok(true)
    }

    fn try_migrate_rows<S>(&self, stepper: &mut S) -> Result<bool>
    where
        S: Stepper + ?Sized,
    {
        let (info, epoch) = {
            let state = self.state.read();
            // Cross-database sources first, so attached schemas are released early.
            let picked = state
                .migratings
                .values()
                .find(|info| info.is_cross_database())
                .or_else(|| state.migratings.values().next());
            match picked {
                Some(info) => (Arc::clone(info), state.epoch),
                None => return Ok(false),
            }
        };

        let done = stepper.migrate_rows(&info)?;
        if done {
            debug!(table = info.table(), "rows copied");
            let mut state = self.state.write();
            if state.epoch == epoch {
                state.mark_as_migrated(&info);
            }
        }
        Ok(true)
    }

    fn try_acquire_tables<S>(&self, stepper: &mut S) -> Result<bool>
    where
        S: Stepper + ?Sized,
    {
        let (hints, hints_version, epoch) = {
            let state = self.state.read();
            if state.table_acquired {
                return Ok(false);
            }
            (state.hints.clone(), state.hints_version, state.epoch)
        };

        let mut tables = stepper.all_tables()?;
        tables.extend(hints);
        for table in &tables {
            self.init_info(&*stepper, table)?;
        }

        let mut state = self.state.write();
        // A table hinted meanwhile was not part of this enumeration.
        if state.epoch == epoch && state.hints_version == hints_version {
            state.table_acquired = true;
        }
        debug!(tables = tables.len(), acquired = state.table_acquired, "tables enumerated");
        Ok(true)
    }

    fn try_finish(&self) -> bool {
        let event = {
            let mut state = self.state.write();
            if !state.table_acquired
                || !state.dumpster.is_empty()
                || !state.migratings.is_empty()
                || !state.referenceds.is_empty()
            {
                return false;
            }
            if !state.hints.is_empty() {
                // Enumerate again next time, a hinted table may exist by then.
                state.table_acquired = false;
                return false;
            }
            if state.migrated {
                return true;
            }
            state.migrated = true;
            state.event.clone()
        };
        info!("migration finished");
        if let Some(event) = event {
            event.did_migrate(None);
        }
        true
    }
}
