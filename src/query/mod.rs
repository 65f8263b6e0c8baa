//! Statement planning: predicates, DDL, writes, reads and index reconciliation.

pub mod ddl;
pub mod predicate;
pub mod read;
pub mod reconcile;
pub mod statement;
pub mod write;

pub use predicate::{Condition, Operator, Predicate};
pub use read::{ReadPlan, plan_get};
pub use reconcile::IndexCursor;
pub use statement::{Select, Statement, TableRef};
pub use write::{plan_delete, plan_put};
