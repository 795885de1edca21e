//! Per-handle table binding.
//!
//! A [`Binder`] resolves the tables a statement touches while it is being
//! prepared. It remembers which infos the handle's connection is currently
//! set up for (attached schemas, union views) and only asks the handle to
//! redo that setup when the bound set actually changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::coordinator::{InfoInitializer, Migration, RecyclableInfo};
use crate::error::Result;
use crate::info::MigrationInfo;

/// Infos keyed by destination table.
pub type BoundInfos = BTreeMap<String, Arc<MigrationInfo>>;

pub struct Binder {
    migration: Arc<Migration>,
    /// What the connection is currently set up for.
    bounds: BoundInfos,
    /// References taken during the current binding session.
    binding: BTreeMap<String, RecyclableInfo>,
    is_binding: bool,
    rebind: bool,
}

impl Binder {
    pub fn new(migration: Arc<Migration>) -> Self {
        Self {
            migration,
            bounds: BoundInfos::new(),
            binding: BTreeMap::new(),
            is_binding: false,
            rebind: false,
        }
    }

    pub fn migration(&self) -> &Arc<Migration> {
        &self.migration
    }

    /// Begin resolving the tables of one statement.
    pub fn start_binding(&mut self) {
        debug_assert!(!self.is_binding, "binding sessions do not nest");
        self.is_binding = true;
        self.binding.clear();
    }

    /// Resolve `table`, returning its info if it is migrating.
    pub fn bind_table<I>(
        &mut self,
        initializer: &I,
        table: &str,
    ) -> Result<Option<Arc<MigrationInfo>>>
    where
        I: InfoInitializer + ?Sized,
    {
        debug_assert!(self.is_binding);
        if table.is_empty() {
            return Ok(None);
        }
        match self.migration.get_or_init_info(initializer, table)? {
            Some(reference) => {
                let info = Arc::clone(reference.info());
                self.binding.insert(table.to_string(), reference);
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    pub fn hint_that_table_will_be_created<I>(&self, initializer: &I, table: &str) -> Result<()>
    where
        I: InfoInitializer + ?Sized,
    {
        self.migration.hint_that_table_will_be_created(initializer, table)
    }

    /// End the session.
    ///
    /// On success the newly bound infos are merged into the bound set, and
    /// `bind_infos` is called with the merged set if it differs from what the
    /// connection is set up for, or if an earlier setup failed. The
    /// references taken during the session are returned; the caller keeps
    /// them alive for as long as its statements use the infos.
    pub fn stop_binding<F>(
        &mut self,
        succeeded: bool,
        bind_infos: F,
    ) -> Result<Vec<RecyclableInfo>>
    where
        F: FnOnce(&BoundInfos) -> Result<()>,
    {
        debug_assert!(self.is_binding);
        self.is_binding = false;
        let references: Vec<RecyclableInfo> =
            std::mem::take(&mut self.binding).into_values().collect();
        if !succeeded {
            return Ok(Vec::new());
        }

        let mut bindings = self.reduced_bounds();
        for reference in &references {
            bindings.insert(reference.table().to_string(), Arc::clone(reference.info()));
        }

        if self.rebind || !same_infos(&bindings, &self.bounds) {
            debug!(
                tables = ?bindings.keys().collect::<Vec<_>>(),
                forced = self.rebind,
                "rebinding migrating tables"
            );
            if let Err(err) = bind_infos(&bindings) {
                warn!(error = %err, "failed to bind migrating tables");
                self.rebind = true;
                return Err(err);
            }
            self.rebind = false;
            self.bounds = bindings;
        }
        Ok(references)
    }

    /// The info `table` is currently bound to.
    pub fn bound_info(&self, table: &str) -> Option<&Arc<MigrationInfo>> {
        self.bounds.get(table)
    }

    pub fn bounds(&self) -> &BoundInfos {
        &self.bounds
    }

    /// Forget the bound set, so the next session sets the connection up again.
    pub fn mark_need_rebind(&mut self) {
        self.bounds.clear();
        self.rebind = true;
    }

    /// The bound set without the infos whose tables finished migrating.
    ///
    /// The connection stays set up for the full bound set until the reduced
    /// one has been bound in its place.
    fn reduced_bounds(&self) -> BoundInfos {
        self.bounds
            .iter()
            .filter(|(_, info)| self.migration.is_migrating(info))
            .map(|(table, info)| (table.clone(), Arc::clone(info)))
            .collect()
    }
}

fn same_infos(left: &BoundInfos, right: &BoundInfos) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|((lt, li), (rt, ri))| lt == rt && Arc::ptr_eq(li, ri))
}
