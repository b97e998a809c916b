pub mod connection;
pub mod context;
pub mod ident;
pub mod introspect;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod plan;
pub mod planner;
pub mod registry;
pub mod runner;
pub mod step;

pub use context::{ExecMode, MigrationContext};
pub use introspect::Introspector;
pub use ledger::{Ledger, LedgerEntry};
pub use lock::{AdvisoryLock, LockGuard, LockHolder};
pub use migration::{Migration, Verification};
pub use plan::{Direction, DownTarget, UpTarget};
pub use planner::{DryRunPlanner, Plan, PlannedMigration};
pub use registry::{Registry, RegistryBuilder};
pub use runner::{
    BatchReport, BatchState, CompletedMigration, MigrationEvent, MigrationRunner,
    MigrationStatus, RunnerOptions, StatusReport,
};
pub use step::{SchemaStep, StepMigration};
