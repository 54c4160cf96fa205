pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::MigrationRecord;

/// File name suffix of an up script: `<version>_up.sql`.
pub const UP_SUFFIX: &str = "_up.sql";

/// File name suffix of a down script: `<version>_down.sql`.
pub const DOWN_SUFFIX: &str = "_down.sql";
