pub mod blacklist;
pub mod fetch;
pub mod node;
pub mod session;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

pub use blacklist::{BlacklistChange, apply_selective_sync, plan_changes, project_blacklist};
pub use fetch::{FetchDriver, FetchError, FetchOutcome, RemoteListingFetcher};
pub use node::{CheckState, PathIndex, SubfolderNode};
pub use session::{SelectiveSyncSession, SessionError, SessionUpdate};
pub use tree::{EXCLUDE_ALL, FetchRequest, FetchTicket, RowsInserted, SelectiveSyncTree};
