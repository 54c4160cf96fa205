pub mod connect;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod session;
pub mod sqlite;
pub mod tracking;

pub use connect::open_session;
pub use session::{Session, Transaction, TransactionDriver};
pub use sqlite::SqliteSession;
pub use tracking::{BucketStore, SqliteStore, TrackingStore, open_store, provision};
