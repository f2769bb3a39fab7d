//! Chat history dataset merge engine: a typed data model for chats/messages/content, a storage
//! DAO contract, and the two-stream diff engine + merge executor that reconcile two snapshots
//! of the same conversation into one dataset.
//!
//! Format parsing, UI, auth, and search indexing are collaborator territory and live outside
//! this crate; it only consumes and produces through [`dao::ChatHistoryDao`].

pub mod ids;
pub mod entities;
pub mod utils;
pub mod dao;
pub mod merge;
