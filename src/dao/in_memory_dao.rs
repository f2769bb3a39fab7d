//! Reference `ChatHistoryDao`/`MutableChatHistoryDao` implementation: everything lives in a
//! `Vec` per dataset. Used both as a lightweight standalone backend and as the merge executor's
//! usual target in tests.

use std::cmp;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use super::*;
use crate::utils::{copy_file_idempotent, DatasetRoot, Result};
use crate::require;

struct ChatEntry {
    chat: Chat,
    messages: Vec<Message>,
    next_internal_id: i64,
}

struct DatasetEntry {
    dataset: Dataset,
    root: DatasetRoot,
    myself_id: UserId,
    users: Vec<User>,
    chats: Vec<ChatEntry>,
}

pub struct InMemoryDao {
    name: String,
    storage_path: PathBuf,
    datasets: Vec<DatasetEntry>,
    backups_enabled: bool,
}

impl InMemoryDao {
    pub fn new(name: String, storage_path: PathBuf) -> Self {
        InMemoryDao { name, storage_path, datasets: vec![], backups_enabled: true }
    }

    /// Seeds a dataset with its users and chats directly - convenient for tests that don't need
    /// `insert_*` semantics (no file copying, ids kept as given).
    pub fn with_dataset(mut self, dataset: Dataset, root: DatasetRoot, myself_id: UserId,
                         users: Vec<User>, chats: Vec<(Chat, Vec<Message>)>) -> Self {
        let chats = chats.into_iter()
            .map(|(chat, messages)| {
                let next_internal_id = messages.iter().map(|m| *m.internal_id).max().unwrap_or(0) + 1;
                ChatEntry { chat, messages, next_internal_id }
            })
            .collect_vec();
        self.datasets.push(DatasetEntry { dataset, root, myself_id, users, chats });
        self
    }

    fn dataset_entry(&self, ds_uuid: &PbUuid) -> Result<&DatasetEntry> {
        self.datasets.iter().find(|e| e.dataset.uuid == *ds_uuid)
            .ok_or_else(|| anyhow::anyhow!("dataset {:?} not loaded", ds_uuid.0))
    }

    fn dataset_entry_mut(&mut self, ds_uuid: &PbUuid) -> Result<&mut DatasetEntry> {
        self.datasets.iter_mut().find(|e| e.dataset.uuid == *ds_uuid)
            .ok_or_else(|| anyhow::anyhow!("dataset {:?} not loaded", ds_uuid.0))
    }

    fn chat_entry(&self, chat: &Chat) -> Result<&ChatEntry> {
        self.dataset_entry(&chat.ds_uuid)?.chats.iter().find(|e| e.chat.id == chat.id)
            .ok_or_else(|| anyhow::anyhow!("chat {} not found", chat.qualified_name()))
    }

    fn chat_members(entry: &DatasetEntry, chat: &Chat) -> Vec<User> {
        let myself = entry.users.iter().find(|u| u.id == entry.myself_id)
            .unwrap_or_else(|| panic!("myself (id {:?}) missing from users", entry.myself_id)).clone();
        let mut members = chat.member_ids.iter()
            .filter(|&&id| id != myself.id)
            .map(|&id| entry.users.iter().find(|u| u.id == id).cloned()
                .unwrap_or_else(|| panic!("no member with id {:?} in chat {}", id, chat.qualified_name())))
            .sorted_by_key(|u| u.id)
            .collect_vec();
        members.insert(0, myself);
        members
    }
}

impl ChatHistoryDao for InMemoryDao {
    fn name(&self) -> &str { &self.name }

    fn storage_path(&self) -> &Path { &self.storage_path }

    fn datasets(&self) -> Result<Vec<Dataset>> {
        Ok(self.datasets.iter().map(|e| e.dataset.clone()).collect_vec())
    }

    fn dataset_root(&self, ds_uuid: &PbUuid) -> Result<DatasetRoot> {
        Ok(self.dataset_entry(ds_uuid)?.root.clone())
    }

    fn myself(&self, ds_uuid: &PbUuid) -> Result<User> {
        let entry = self.dataset_entry(ds_uuid)?;
        entry.users.iter().find(|u| u.id == entry.myself_id).cloned()
            .ok_or_else(|| anyhow::anyhow!("myself missing from users"))
    }

    fn users_inner(&self, ds_uuid: &PbUuid) -> Result<Vec<User>> {
        Ok(self.dataset_entry(ds_uuid)?.users.clone())
    }

    fn chats_inner(&self, ds_uuid: &PbUuid) -> Result<Vec<ChatWithDetails>> {
        let entry = self.dataset_entry(ds_uuid)?;
        Ok(entry.chats.iter()
            .map(|ce| ChatWithDetails {
                chat: ce.chat.clone(),
                last_msg_option: ce.messages.last().cloned(),
                members: Self::chat_members(entry, &ce.chat),
            })
            .collect_vec())
    }

    fn scroll_messages(&self, chat: &Chat, offset: usize, limit: usize) -> Result<Vec<Message>> {
        let msgs = &self.chat_entry(chat)?.messages;
        Ok(cutout(msgs, offset as i64, (offset + limit) as i64))
    }

    fn last_messages(&self, chat: &Chat, limit: usize) -> Result<Vec<Message>> {
        let msgs = &self.chat_entry(chat)?.messages;
        Ok(cutout(msgs, msgs.len() as i64 - limit as i64, msgs.len() as i64))
    }

    fn messages_before_impl(&self, chat: &Chat, msg_id: MessageInternalId, limit: usize) -> Result<Vec<Message>> {
        let msgs = &self.chat_entry(chat)?.messages;
        let idx = msgs.iter().rposition(|m| m.internal_id <= msg_id)
            .ok_or_else(|| anyhow::anyhow!("message not found"))? as i64;
        Ok(cutout(msgs, idx - limit as i64 + 1, idx + 1))
    }

    fn messages_after_impl(&self, chat: &Chat, msg_id: MessageInternalId, limit: usize) -> Result<Vec<Message>> {
        let msgs = &self.chat_entry(chat)?.messages;
        let idx = msgs.iter().position(|m| m.internal_id >= msg_id)
            .ok_or_else(|| anyhow::anyhow!("message not found"))? as i64;
        Ok(cutout(msgs, idx, idx + limit as i64))
    }

    fn messages_between(&self, chat: &Chat, msg1_id: MessageInternalId, msg2_id: MessageInternalId) -> Result<Vec<Message>> {
        let msgs = &self.chat_entry(chat)?.messages;
        let idx1 = msgs.iter().position(|m| m.internal_id >= msg1_id)
            .ok_or_else(|| anyhow::anyhow!("message 1 not found"))?;
        let idx2 = msgs.iter().rposition(|m| m.internal_id <= msg2_id)
            .ok_or_else(|| anyhow::anyhow!("message 2 not found"))?;
        require!(idx2 >= idx1, "message 2 precedes message 1");
        Ok(msgs[idx1..=idx2].to_vec())
    }

    fn count_messages_between(&self, chat: &Chat, msg1_id: MessageInternalId, msg2_id: MessageInternalId) -> Result<usize> {
        require!(msg1_id <= msg2_id, "message 1 must not be after message 2");
        let between = self.messages_between(chat, msg1_id, msg2_id)?;
        if between.is_empty() { return Ok(0); }
        let mut size = between.len() as i64;
        if between.first().unwrap().internal_id == msg1_id { size -= 1; }
        if between.last().unwrap().internal_id == msg2_id { size -= 1; }
        Ok(cmp::max(size, 0) as usize)
    }

    fn message_option(&self, chat: &Chat, source_id: MessageSourceId) -> Result<Option<Message>> {
        Ok(self.chat_entry(chat)?.messages.iter().find(|m| m.source_id_option == Some(source_id)).cloned())
    }

    fn message_option_by_internal_id(&self, chat: &Chat, internal_id: MessageInternalId) -> Result<Option<Message>> {
        Ok(self.chat_entry(chat)?.messages.iter().find(|m| m.internal_id == internal_id).cloned())
    }
}

impl MutableChatHistoryDao for InMemoryDao {
    fn backup(&mut self) -> Result<()> {
        log::info!("in-memory DAO '{}' has no durable storage to back up", self.name);
        Ok(())
    }

    fn disable_backups(&mut self) { self.backups_enabled = false; }

    fn enable_backups(&mut self) { self.backups_enabled = true; }

    fn insert_dataset(&mut self, ds: Dataset) -> Result<Dataset> {
        require!(self.datasets.iter().all(|e| e.dataset.uuid != ds.uuid), "dataset already inserted");
        let root = DatasetRoot(self.storage_path.join(ds.uuid.0.to_string()));
        std::fs::create_dir_all(&root.0)?;
        self.datasets.push(DatasetEntry {
            dataset: ds.clone(), root, myself_id: UserId::INVALID, users: vec![], chats: vec![],
        });
        Ok(ds)
    }

    fn insert_user(&mut self, ds_uuid: &PbUuid, user: User, is_myself: bool) -> Result<User> {
        let entry = self.dataset_entry_mut(ds_uuid)?;
        require!(entry.users.iter().all(|u| u.id != user.id), "user {:?} already inserted", user.id);
        if is_myself { entry.myself_id = user.id; }
        entry.users.push(user.clone());
        Ok(user)
    }

    fn insert_chat(&mut self, ds_uuid: &PbUuid, mut chat: Chat, src_ds_root: &DatasetRoot) -> Result<Chat> {
        let entry = self.dataset_entry_mut(ds_uuid)?;
        require!(entry.chats.iter().all(|e| e.chat.id != chat.id), "chat {} already inserted", chat.qualified_name());
        if let Some(path) = &chat.img_path_option {
            copy_file_idempotent(src_ds_root, &entry.root, path)?;
        }
        chat.msg_count = 0;
        entry.chats.push(ChatEntry { chat: chat.clone(), messages: vec![], next_internal_id: 1 });
        Ok(chat)
    }

    fn insert_messages(&mut self, ds_uuid: &PbUuid, chat: &Chat, msgs: Vec<Message>, src_ds_root: &DatasetRoot) -> Result<()> {
        let root = self.dataset_entry(ds_uuid)?.root.clone();
        for path in msgs.iter().flat_map(|m| m.files_relative()) {
            copy_file_idempotent(src_ds_root, &root, path)?;
        }
        let entry = self.dataset_entry_mut(ds_uuid)?;
        let chat_entry = entry.chats.iter_mut().find(|e| e.chat.id == chat.id)
            .ok_or_else(|| anyhow::anyhow!("chat {} not found", chat.qualified_name()))?;
        for mut msg in msgs {
            msg.internal_id = MessageInternalId(chat_entry.next_internal_id);
            chat_entry.next_internal_id += 1;
            chat_entry.chat.msg_count += 1;
            chat_entry.messages.push(msg);
        }
        Ok(())
    }
}

/// Clamped `slice[start_inc..end_exc]`, used by the pagination methods above.
fn cutout<T: Clone>(slice: &[T], start_inc: i64, end_exc: i64) -> Vec<T> {
    fn sanitize<T>(idx: i64, slice: &[T]) -> usize {
        cmp::min(cmp::max(idx, 0), slice.len() as i64) as usize
    }
    slice[sanitize(start_inc, slice)..sanitize(end_exc, slice)].to_vec()
}
