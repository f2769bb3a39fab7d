//! Storage backend contract: everything the diff engine and merge executor need from
//! wherever a dataset actually lives. `in_memory_dao` is the one implementation carried here -
//! both a legitimate lightweight backend and the merge executor's usual target in tests.

use std::path::Path;

use itertools::Itertools;

use crate::entities::equality::{PracticalEq, PracticalEqTuple};
use crate::entities::*;
use crate::ids::*;
use crate::require;
use crate::utils::{measure, DatasetRoot, FileHashCache, Result};

pub mod in_memory_dao;

/// Everything except messages is expected to be cheap and pre-computed; messages are read
/// through the paginated methods below so a backend never has to hold a whole chat in memory.
pub trait ChatHistoryDao: Send {
    /// User-friendly name of the loaded data.
    fn name(&self) -> &str;

    /// Directory that stores everything, including per-dataset roots.
    fn storage_path(&self) -> &Path;

    fn datasets(&self) -> Result<Vec<Dataset>>;

    /// Directory that stores everything in the dataset; every message path is relative to it.
    fn dataset_root(&self, ds_uuid: &PbUuid) -> Result<DatasetRoot>;

    fn myself(&self, ds_uuid: &PbUuid) -> Result<User>;

    /// Contains myself first, then the rest sorted by id.
    fn users(&self, ds_uuid: &PbUuid) -> Result<Vec<User>> {
        let myself = self.myself(ds_uuid)?;
        let mut rest = self.users_inner(ds_uuid)?.into_iter().filter(|u| u.id != myself.id).collect_vec();
        rest.sort_by_key(|u| u.id);
        let mut result = vec![myself];
        result.extend(rest);
        Ok(result)
    }

    fn users_inner(&self, ds_uuid: &PbUuid) -> Result<Vec<User>>;

    fn user_option(&self, ds_uuid: &PbUuid, id: UserId) -> Result<Option<User>> {
        Ok(self.users_inner(ds_uuid)?.into_iter().find(|u| u.id == id))
    }

    /// Chats ordered by last message timestamp, descending; chats with no messages last.
    fn chats(&self, ds_uuid: &PbUuid) -> Result<Vec<ChatWithDetails>> {
        let mut chats = self.chats_inner(ds_uuid)?;
        chats.sort_by_key(|cwd| cwd.last_msg_option.as_ref().map(|m| -*m.timestamp).unwrap_or(i64::MAX));
        Ok(chats)
    }

    fn chats_inner(&self, ds_uuid: &PbUuid) -> Result<Vec<ChatWithDetails>>;

    fn chat_option(&self, ds_uuid: &PbUuid, id: ChatId) -> Result<Option<ChatWithDetails>> {
        Ok(self.chats_inner(ds_uuid)?.into_iter().find(|c| c.chat.id == id))
    }

    /// Skip `offset` messages then take `limit`, in forward time order.
    fn scroll_messages(&self, chat: &Chat, offset: usize, limit: usize) -> Result<Vec<Message>>;

    fn first_messages(&self, chat: &Chat, limit: usize) -> Result<Vec<Message>> {
        self.scroll_messages(chat, 0, limit)
    }

    fn last_messages(&self, chat: &Chat, limit: usize) -> Result<Vec<Message>>;

    /// At most `limit` messages ending with (and including) `msg_id`; at least one element.
    fn messages_before(&self, chat: &Chat, msg_id: MessageInternalId, limit: usize) -> Result<Vec<Message>> {
        require!(limit > 0, "limit is zero");
        let result = self.messages_before_impl(chat, msg_id, limit)?;
        assert!(!result.is_empty() && result.len() <= limit);
        Ok(result)
    }

    fn messages_before_impl(&self, chat: &Chat, msg_id: MessageInternalId, limit: usize) -> Result<Vec<Message>>;

    /// At most `limit` messages starting with (and including) `msg_id`; at least one element.
    fn messages_after(&self, chat: &Chat, msg_id: MessageInternalId, limit: usize) -> Result<Vec<Message>> {
        require!(limit > 0, "limit is zero");
        let result = self.messages_after_impl(chat, msg_id, limit)?;
        assert!(!result.is_empty() && result.len() <= limit);
        Ok(result)
    }

    fn messages_after_impl(&self, chat: &Chat, msg_id: MessageInternalId, limit: usize) -> Result<Vec<Message>>;

    /// Messages between `msg1_id` and `msg2_id`, inclusive on both ends.
    fn messages_between(&self, chat: &Chat, msg1_id: MessageInternalId, msg2_id: MessageInternalId) -> Result<Vec<Message>>;

    /// Count of messages strictly between `msg1_id` and `msg2_id`, exclusive on both ends.
    fn count_messages_between(&self, chat: &Chat, msg1_id: MessageInternalId, msg2_id: MessageInternalId) -> Result<usize>;

    fn message_option(&self, chat: &Chat, source_id: MessageSourceId) -> Result<Option<Message>>;

    fn message_option_by_internal_id(&self, chat: &Chat, internal_id: MessageInternalId) -> Result<Option<Message>>;

    fn is_loaded(&self, storage_path: &Path) -> bool {
        self.storage_path() == storage_path
    }
}

pub trait MutableChatHistoryDao: ChatHistoryDao {
    /// Snapshot the dataset storage for recovery; the merge executor's only rollback mechanism.
    fn backup(&mut self) -> Result<()>;

    fn disable_backups(&mut self);

    fn enable_backups(&mut self);

    /// Inserts the dataset as-is, with its UUID already set.
    fn insert_dataset(&mut self, ds: Dataset) -> Result<Dataset>;

    fn insert_user(&mut self, ds_uuid: &PbUuid, user: User, is_myself: bool) -> Result<User>;

    /// Copies the chat's avatar (if any) from `src_ds_root`.
    fn insert_chat(&mut self, ds_uuid: &PbUuid, chat: Chat, src_ds_root: &DatasetRoot) -> Result<Chat>;

    /// Inserts messages for the given chat, ignoring their `internal_id` and copying every
    /// referenced file from `src_ds_root` into this DAO's own dataset root.
    fn insert_messages(&mut self, ds_uuid: &PbUuid, chat: &Chat, msgs: Vec<Message>, src_ds_root: &DatasetRoot) -> Result<()>;
}

const EQUALITY_CHECK_BATCH_SIZE: usize = 5_000;

/// Deep structural comparison of two DAOs' contents for a dataset pair - used by round-trip
/// tests to confirm a merge (or export/import) didn't lose or alter anything (Testable
/// Properties 6 and 7).
pub fn ensure_datasets_are_equal(master_dao: &dyn ChatHistoryDao,
                                  master_ds_uuid: &PbUuid,
                                  slave_dao: &dyn ChatHistoryDao,
                                  slave_ds_uuid: &PbUuid) -> Result<()> {
    measure(|| -> Result<()> {
        let master_ds_root = master_dao.dataset_root(master_ds_uuid)?;
        let slave_ds_root = slave_dao.dataset_root(slave_ds_uuid)?;
        let cache = FileHashCache::new();

        let master_users = master_dao.users(master_ds_uuid)?;
        let slave_users = slave_dao.users(slave_ds_uuid)?;
        require!(master_users.len() == slave_users.len(),
                 "user count differs: was {} became {}", master_users.len(), slave_users.len());
        for (i, (master_user, slave_user)) in master_users.iter().zip(slave_users.iter()).enumerate() {
            require!(master_user.id == slave_user.id
                          && master_user.first_name_option == slave_user.first_name_option
                          && master_user.last_name_option == slave_user.last_name_option
                          && master_user.username_option == slave_user.username_option
                          && master_user.phone_number_option == slave_user.phone_number_option,
                     "user #{i} differs:\nwas    {:?}\nbecame {:?}", master_user, slave_user);
        }

        let master_chats = master_dao.chats(master_ds_uuid)?;
        let slave_chats = slave_dao.chats(slave_ds_uuid)?;
        require!(master_chats.len() == slave_chats.len(),
                 "chat count differs: was {} became {}", master_chats.len(), slave_chats.len());

        for (i, (master_cwd, slave_cwd)) in master_chats.iter().zip(slave_chats.iter()).enumerate() {
            measure(|| -> Result<()> {
                let master_pet = PracticalEqTuple::new(&master_cwd.chat, &master_ds_root, master_cwd, &cache);
                let slave_pet = PracticalEqTuple::new(&slave_cwd.chat, &slave_ds_root, slave_cwd, &cache);
                require!(master_pet.practically_equals(&slave_pet)?,
                         "chat #{i} differs:\nwas    {:?}\nbecame {:?}", master_cwd.chat, slave_cwd.chat);

                let msg_count = master_cwd.chat.msg_count as usize;
                let mut offset: usize = 0;
                while offset < msg_count {
                    let master_messages = master_dao.scroll_messages(&master_cwd.chat, offset, EQUALITY_CHECK_BATCH_SIZE)?;
                    let slave_messages = slave_dao.scroll_messages(&slave_cwd.chat, offset, EQUALITY_CHECK_BATCH_SIZE)?;
                    require!(!master_messages.is_empty() && !slave_messages.is_empty(),
                             "empty messages batch, either flawed batching or wrong msg_count");
                    require!(master_messages.len() == slave_messages.len(),
                             "message count for chat {} differs at offset {offset}: was {} became {}",
                             master_cwd.chat.qualified_name(), master_messages.len(), slave_messages.len());

                    for (j, (master_msg, slave_msg)) in master_messages.iter().zip(slave_messages.iter()).enumerate() {
                        let master_pet = PracticalEqTuple::new(master_msg, &master_ds_root, master_cwd, &cache);
                        let slave_pet = PracticalEqTuple::new(slave_msg, &slave_ds_root, slave_cwd, &cache);
                        require!(master_pet.practically_equals(&slave_pet)?,
                                 "message #{j} for chat {} differs:\nwas    {:?}\nbecame {:?}",
                                 master_cwd.chat.qualified_name(), master_msg, slave_msg);
                    }
                    offset += master_messages.len();
                }
                Ok(())
            }, |_, t| log::info!("chat {} ({} messages) checked in {t} ms",
                                 slave_cwd.chat.qualified_name(), slave_cwd.chat.msg_count))?;
        }
        Ok(())
    }, |_, t| log::info!("dataset equality checked in {t} ms"))
}
