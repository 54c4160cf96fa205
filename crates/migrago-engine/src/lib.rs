//! Migration engine: resolves script directories, applies and reverts
//! migrations against a target session, and keeps the tracking store in step.

pub mod apply;
pub mod history;
pub mod resolver;
pub mod revert;
pub mod scaffold;

pub use apply::{ApplyReport, apply_all, apply_binding};
pub use history::{describe, history};
pub use resolver::resolve;
pub use revert::{RevertOutcome, RevertReport, revert};
pub use scaffold::{CreateMode, create_scripts};
