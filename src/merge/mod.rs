//! Dataset merge: a diff engine that aligns two message streams ([`analyzer`]) and an executor
//! that writes a reconciled dataset from a diff plus user decisions ([`merger`]).
//!
//! Master and slave messages are tagged at the type level so the diff engine cannot mix up which
//! DAO an internal id came from.

use derive_deref::Deref;

use crate::entities::Message;
use crate::ids::{MasterInternalId, SlaveInternalId};

pub mod stream;
pub mod analyzer;
pub mod merger;

pub trait WithTypedId {
    type Item: Copy + Eq;
    fn typed_id(&self) -> Self::Item;
}

#[derive(Deref, Clone, Debug)]
pub struct MasterMessage(pub Message);

impl WithTypedId for MasterMessage {
    type Item = MasterInternalId;
    fn typed_id(&self) -> MasterInternalId { MasterInternalId(self.0.internal_id) }
}

#[derive(Deref, Clone, Debug)]
pub struct SlaveMessage(pub Message);

impl WithTypedId for SlaveMessage {
    type Item = SlaveInternalId;
    fn typed_id(&self) -> SlaveInternalId { SlaveInternalId(self.0.internal_id) }
}
