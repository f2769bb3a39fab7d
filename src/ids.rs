//! Newtype identifiers.
//!
//! Every ID the core hands around is a distinct, `Deref`-to-`i64` newtype rather than a bare
//! `i64`, so that e.g. a `UserId` can never be accidentally compared to a `MessageInternalId`.
//! `MessageInternalId` additionally gets master/slave-tagged wrappers (`MasterInternalId` /
//! `SlaveInternalId`) so the diff engine cannot confuse which DAO an internal id came from.

use derive_deref::Deref;

#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl UserId {
    pub const INVALID: UserId = UserId(0);
}

#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageSourceId(pub i64);

/// Opaque, storage-assigned, monotonically increasing within a chat. Not stable across DAOs:
/// never persist one, never compare one obtained from one DAO against one from another.
#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageInternalId(pub i64);

pub const NO_INTERNAL_ID: MessageInternalId = MessageInternalId(-1);

/// Number of epoch seconds.
#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(i64::MAX);
}

/// `MessageInternalId` tagged as having come from the master stream. The diff engine only
/// ever receives one of these or a [`SlaveInternalId`], never a bare `MessageInternalId`,
/// so a mixup would be a type error rather than a silent bug.
#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MasterInternalId(pub MessageInternalId);

#[derive(Deref, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlaveInternalId(pub MessageInternalId);
