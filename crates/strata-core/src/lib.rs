//! Strata Core - online table migration for SQLite.
//!
//! Rows move from a source table, possibly in another database file, into a
//! destination table in small batches while the application keeps using the
//! destination table through a [`MigratingHandle`]. Reads see the union of
//! both tables, writes land in the right one, and the source table is
//! dropped once it is empty and no statement refers to it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_core::{
//!     HandleConfig, Migration, MigrationPlan, MigratingHandle, StepperConfig, StepperHandle,
//! };
//!
//! # fn main() -> strata_core::Result<()> {
//! let migration = Arc::new(Migration::new());
//! let plan = MigrationPlan::from_json(
//!     r#"{"tables": [{"table": "orders", "source_table": "orders_v1"}]}"#,
//! )?;
//! migration.filter_table(Some(plan.into_filter("app.db")?));
//!
//! let handle = MigratingHandle::open("app.db", Arc::clone(&migration), HandleConfig::default())?;
//! handle.execute("INSERT INTO orders(total) VALUES (?)", &[&12.5])?;
//!
//! let mut stepper = StepperHandle::open("app.db", StepperConfig::default())?;
//! while !stepper.step(&migration)? {}
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod info;
pub mod introspect;
pub mod recovery;
pub mod statement;
pub mod stepper;

pub use binder::{Binder, BoundInfos};
pub use config::{HandleConfig, MigrationPlan, StepperConfig, TableMapping};
pub use coordinator::{
    Filter, InfoInitializer, InfoLookup, Migration, MigrationEvent, MigrationStatus,
    RecyclableInfo, Stepper,
};
pub use error::{MigrationError, Result};
pub use handle::MigratingHandle;
pub use info::{MigrationBaseInfo, MigrationInfo, MigrationUserInfo, TableColumns};
pub use recovery::{MissingSchema, SchemaRecovery};
pub use statement::MigratingStatement;
pub use stepper::StepperHandle;
