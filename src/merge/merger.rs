//! Merge executor: consumes user-reviewed merge decisions and writes a reconciled
//! dataset into a target DAO, copying referenced files and fixing up member-name fields along
//! the way.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::dao::{ChatHistoryDao, MutableChatHistoryDao};
use crate::entities::*;
use crate::ids::*;
use crate::merge::analyzer::DiffSegment;
use crate::require;
use crate::utils::{file_exists, measure, CancellationToken, DatasetRoot, Outcome, Result};

#[cfg(test)]
#[path = "merger_tests.rs"]
mod tests;

const BATCH_SIZE: usize = 1000;

/// One decision per master user (present in master, or not) and per slave user (present in
/// slave, or not) sharing a single id - the same entity re-exported on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMergeOption {
    /// Master-only, or unchanged on both sides - keep master's version.
    Keep(UserId),
    /// Slave-only - add it.
    Add(UserId),
    /// Present on both sides, conflicting - use slave's version.
    Replace(UserId),
}

impl UserMergeOption {
    fn master_user_id_option(&self) -> Option<UserId> {
        match *self {
            UserMergeOption::Keep(id) => Some(id),
            UserMergeOption::Add(_) => None,
            UserMergeOption::Replace(id) => Some(id),
        }
    }

    fn slave_user_id_option(&self) -> Option<UserId> {
        match *self {
            UserMergeOption::Keep(_) => None,
            UserMergeOption::Add(id) => Some(id),
            UserMergeOption::Replace(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatMergeOption {
    /// Master-only - copy every message from master.
    Keep { master_chat_id: ChatId },
    /// Slave-only - copy every message from slave.
    Add { slave_chat_id: ChatId },
    /// Present on both sides under the same id - walk the reviewed per-segment decisions.
    Combine { chat_id: ChatId, message_merges: Vec<MessagesMergeDecision> },
}

/// A user-reviewed resolution of one engine-emitted [`DiffSegment`]. `Match`/`Retain`/`Add`
/// carry the engine's own verdict forward unchanged; `Replace` defaults to slave winning (new
/// content), with `DontReplace` as the only override a user can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagesMergeDecision {
    Retain { first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId },
    Add { first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId },
    Replace {
        first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId,
        first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId,
    },
    DontReplace {
        first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId,
        first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId,
    },
    Match {
        first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId,
        first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId,
    },
}

/// The default resolution of an engine-emitted segment, before any user override.
impl From<DiffSegment> for MessagesMergeDecision {
    fn from(seg: DiffSegment) -> Self {
        match seg {
            DiffSegment::Retain { first_master_msg_id, last_master_msg_id } =>
                MessagesMergeDecision::Retain { first_master_msg_id, last_master_msg_id },
            DiffSegment::Add { first_slave_msg_id, last_slave_msg_id } =>
                MessagesMergeDecision::Add { first_slave_msg_id, last_slave_msg_id },
            DiffSegment::Replace { first_master_msg_id, last_master_msg_id, first_slave_msg_id, last_slave_msg_id } =>
                MessagesMergeDecision::Replace { first_master_msg_id, last_master_msg_id, first_slave_msg_id, last_slave_msg_id },
            DiffSegment::Match { first_master_msg_id, last_master_msg_id, first_slave_msg_id, last_slave_msg_id } =>
                MessagesMergeDecision::Match { first_master_msg_id, last_master_msg_id, first_slave_msg_id, last_slave_msg_id },
        }
    }
}

/// Writes a new, freshly-UUID'd dataset into `target_dao` by reconciling `master_ds`/`slave_ds`
/// per the given decisions. Takes a backup of the target storage first (if it already holds
/// anything), disables its automatic backups for the duration, and always re-enables them
/// before returning - success, failure, or cancellation alike.
pub fn merge_datasets(
    master_dao: &dyn ChatHistoryDao, master_ds: &Dataset,
    slave_dao: &dyn ChatHistoryDao, slave_ds: &Dataset,
    target_dao: &mut dyn MutableChatHistoryDao,
    user_merges: Vec<UserMergeOption>,
    chat_merges: Vec<ChatMergeOption>,
    cancellation: &CancellationToken,
) -> Result<Outcome<PbUuid>> {
    measure(|| {
        if !target_dao.datasets()?.is_empty() {
            target_dao.backup()?;
        }
        target_dao.disable_backups();
        let result = merge_inner(master_dao, master_ds, slave_dao, slave_ds,
                                  &mut *target_dao, user_merges, chat_merges, cancellation);
        target_dao.enable_backups();
        result
    }, |r, t| if matches!(r, Ok(Outcome::Done(_))) { log::info!("datasets merged in {t} ms") })
}

fn merge_inner(
    master_dao: &dyn ChatHistoryDao, master_ds: &Dataset,
    slave_dao: &dyn ChatHistoryDao, slave_ds: &Dataset,
    target_dao: &mut dyn MutableChatHistoryDao,
    user_merges: Vec<UserMergeOption>,
    chat_merges: Vec<ChatMergeOption>,
    cancellation: &CancellationToken,
) -> Result<Outcome<PbUuid>> {
    let master_users: HashMap<UserId, User> = master_dao.users(&master_ds.uuid)?.into_iter().map(|u| (u.id, u)).collect();
    let slave_users: HashMap<UserId, User> = slave_dao.users(&slave_ds.uuid)?.into_iter().map(|u| (u.id, u)).collect();
    let master_cwds: HashMap<ChatId, ChatWithDetails> = master_dao.chats(&master_ds.uuid)?.into_iter().map(|c| (c.chat.id, c)).collect();
    let slave_cwds: HashMap<ChatId, ChatWithDetails> = slave_dao.chats(&slave_ds.uuid)?.into_iter().map(|c| (c.chat.id, c)).collect();

    let user_merges = augment_user_merges(user_merges, &master_users, &slave_users)?;
    validate_chat_merges(&chat_merges, &master_cwds, &slave_cwds)?;

    let master_ds_root = master_dao.dataset_root(&master_ds.uuid)?;
    let slave_ds_root = slave_dao.dataset_root(&slave_ds.uuid)?;
    let master_self = master_dao.myself(&master_ds.uuid)?;

    let new_ds = Dataset { uuid: PbUuid::random(), alias: format!("{} (merged)", master_ds.alias), source_type: "merged".to_owned() };
    let new_ds = target_dao.insert_dataset(new_ds)?;

    let mut self_count = 0;
    for um in &user_merges {
        let user_to_insert = match *um {
            UserMergeOption::Keep(id) => master_users.get(&id).cloned(),
            UserMergeOption::Add(id) | UserMergeOption::Replace(id) => slave_users.get(&id).cloned(),
        };
        let mut user = user_to_insert.ok_or_else(|| anyhow::anyhow!(
            "user merge option {:?} referenced a user missing from its source dataset", um))?;
        user.ds_uuid = new_ds.uuid;
        let is_myself = user.id == master_self.id;
        if is_myself { self_count += 1; }
        target_dao.insert_user(&new_ds.uuid, user, is_myself)?;
    }
    require!(self_count == 1, "exactly one final user must carry master's self id {}, found {}", master_self.id.0, self_count);
    let final_users = target_dao.users(&new_ds.uuid)?;

    for cm in chat_merges {
        if cancellation.is_cancelled() { return Ok(Outcome::Cancelled); }

        let (mut shell_cwd, shell_ds_root) = match &cm {
            ChatMergeOption::Keep { master_chat_id } => (master_cwds[master_chat_id].clone(), &master_ds_root),
            ChatMergeOption::Add { slave_chat_id } => (slave_cwds[slave_chat_id].clone(), &slave_ds_root),
            // The "shell" chat entity (name default, avatar) comes from slave, the newer snapshot.
            ChatMergeOption::Combine { chat_id, .. } => (slave_cwds[chat_id].clone(), &slave_ds_root),
        };
        shell_cwd.chat.ds_uuid = new_ds.uuid;

        if shell_cwd.chat.tpe == ChatType::Personal {
            let interlocutors = shell_cwd.members.iter().filter(|u| u.id != master_self.id).collect_vec();
            require!(interlocutors.len() == 1,
                     "expected exactly one non-self member in personal chat {}, found {}",
                     shell_cwd.chat.qualified_name(), interlocutors.len());
            let final_user = final_users.iter().find(|u| u.id == interlocutors[0].id).ok_or_else(|| anyhow::anyhow!(
                "user {} not found among final users; personal chat {} should have been skipped",
                interlocutors[0].id.0, shell_cwd.chat.qualified_name()))?;
            shell_cwd.chat.name_option = final_user.pretty_name_option();
        }

        let new_chat = target_dao.insert_chat(&new_ds.uuid, shell_cwd.chat.clone(), shell_ds_root)?;

        let outcome = match cm {
            ChatMergeOption::Keep { master_chat_id } => {
                let cwd = &master_cwds[&master_chat_id];
                copy_all_messages(master_dao, cwd, &master_ds_root,
                                   &mut *target_dao, &new_ds.uuid, &new_chat, &final_users, cancellation)?
            }
            ChatMergeOption::Add { slave_chat_id } => {
                let cwd = &slave_cwds[&slave_chat_id];
                copy_all_messages(slave_dao, cwd, &slave_ds_root,
                                   &mut *target_dao, &new_ds.uuid, &new_chat, &final_users, cancellation)?
            }
            ChatMergeOption::Combine { chat_id, message_merges } => {
                let master_cwd = &master_cwds[&chat_id];
                let slave_cwd = &slave_cwds[&chat_id];
                process_combine(master_dao, master_cwd, &master_ds_root,
                                 slave_dao, slave_cwd, &slave_ds_root,
                                 &mut *target_dao, &new_ds.uuid, &new_chat, &final_users,
                                 message_merges, cancellation)?
            }
        };
        if let Outcome::Cancelled = outcome { return Ok(Outcome::Cancelled); }
    }

    Ok(Outcome::Done(new_ds.uuid))
}

/// Appends a `Keep` for every master user `user_merges` doesn't already mention, so the caller
/// only has to spell out the users that actually need a decision.
fn augment_user_merges(mut user_merges: Vec<UserMergeOption>,
                        master_users: &HashMap<UserId, User>,
                        slave_users: &HashMap<UserId, User>) -> Result<Vec<UserMergeOption>> {
    let master_mentions: HashSet<UserId> = user_merges.iter().filter_map(|m| m.master_user_id_option()).collect();
    for uid in &master_mentions {
        require!(master_users.contains_key(uid), "user merge option mentioned master user {} which doesn't exist", uid.0);
    }
    for uid in master_users.keys() {
        if !master_mentions.contains(uid) {
            user_merges.push(UserMergeOption::Keep(*uid));
        }
    }

    let slave_mentions: HashSet<UserId> = user_merges.iter().filter_map(|m| m.slave_user_id_option()).collect();
    for uid in slave_users.keys() {
        require!(slave_mentions.contains(uid), "slave user {} wasn't mentioned in any merge option", uid.0);
    }
    require!(slave_users.len() == slave_mentions.len(),
             "user merges mention more slave users ({}) than actually exist ({})", slave_mentions.len(), slave_users.len());
    Ok(user_merges)
}

fn validate_chat_merges(chat_merges: &[ChatMergeOption],
                         master_cwds: &HashMap<ChatId, ChatWithDetails>,
                         slave_cwds: &HashMap<ChatId, ChatWithDetails>) -> Result<()> {
    for cm in chat_merges {
        match cm {
            ChatMergeOption::Keep { master_chat_id } =>
                require!(master_cwds.contains_key(master_chat_id), "master chat {} not found", master_chat_id.0),
            ChatMergeOption::Add { slave_chat_id } =>
                require!(slave_cwds.contains_key(slave_chat_id), "slave chat {} not found", slave_chat_id.0),
            ChatMergeOption::Combine { chat_id, .. } => {
                require!(master_cwds.contains_key(chat_id), "master chat {} not found", chat_id.0);
                require!(slave_cwds.contains_key(chat_id), "slave chat {} not found", chat_id.0);
            }
        }
    }
    Ok(())
}

/// Bulk-copies a whole chat from one side only (`Keep`/`Add` chat options).
fn copy_all_messages(
    src_dao: &dyn ChatHistoryDao, src_cwd: &ChatWithDetails, src_ds_root: &DatasetRoot,
    target_dao: &mut dyn MutableChatHistoryDao, target_ds_uuid: &PbUuid, new_chat: &Chat,
    final_users: &[User], cancellation: &CancellationToken,
) -> Result<Outcome<()>> {
    let mut offset = 0_usize;
    loop {
        if cancellation.is_cancelled() { return Ok(Outcome::Cancelled); }
        let mut batch = src_dao.scroll_messages(&src_cwd.chat, offset, BATCH_SIZE)?;
        if batch.is_empty() { break; }
        offset += batch.len();
        for m in batch.iter_mut() {
            fixup_members(m, final_users, src_cwd);
        }
        target_dao.insert_messages(target_ds_uuid, new_chat, batch, src_ds_root)?;
    }
    Ok(Outcome::Done(()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Source { Master, Slave }

/// Walks the reviewed per-segment decisions for a `Combine` chat option, copying from whichever
/// side each decision names.
fn process_combine(
    master_dao: &dyn ChatHistoryDao, master_cwd: &ChatWithDetails, master_ds_root: &DatasetRoot,
    slave_dao: &dyn ChatHistoryDao, slave_cwd: &ChatWithDetails, slave_ds_root: &DatasetRoot,
    target_dao: &mut dyn MutableChatHistoryDao, target_ds_uuid: &PbUuid, new_chat: &Chat,
    final_users: &[User], decisions: Vec<MessagesMergeDecision>, cancellation: &CancellationToken,
) -> Result<Outcome<()>> {
    for decision in decisions {
        if cancellation.is_cancelled() { return Ok(Outcome::Cancelled); }

        let batches: Vec<(Source, Vec<Message>)> = match decision {
            MessagesMergeDecision::Retain { first_master_msg_id, last_master_msg_id } => {
                let msgs = master_dao.messages_between(&master_cwd.chat, *first_master_msg_id, *last_master_msg_id)?;
                vec![(Source::Master, msgs)]
            }
            MessagesMergeDecision::Add { first_slave_msg_id, last_slave_msg_id } => {
                let msgs = slave_dao.messages_between(&slave_cwd.chat, *first_slave_msg_id, *last_slave_msg_id)?;
                vec![(Source::Slave, msgs)]
            }
            MessagesMergeDecision::Replace { first_slave_msg_id, last_slave_msg_id, .. } => {
                let msgs = slave_dao.messages_between(&slave_cwd.chat, *first_slave_msg_id, *last_slave_msg_id)?;
                vec![(Source::Slave, msgs)]
            }
            MessagesMergeDecision::DontReplace { first_master_msg_id, last_master_msg_id, .. } => {
                let msgs = master_dao.messages_between(&master_cwd.chat, *first_master_msg_id, *last_master_msg_id)?;
                vec![(Source::Master, msgs)]
            }
            MessagesMergeDecision::Match { first_master_msg_id, last_master_msg_id, first_slave_msg_id, last_slave_msg_id } => {
                let master_msgs = master_dao.messages_between(&master_cwd.chat, *first_master_msg_id, *last_master_msg_id)?;
                let slave_msgs = slave_dao.messages_between(&slave_cwd.chat, *first_slave_msg_id, *last_slave_msg_id)?;
                require!(master_msgs.len() == slave_msgs.len(),
                         "match segment length mismatch: master has {}, slave has {}", master_msgs.len(), slave_msgs.len());

                master_msgs.into_iter().zip(slave_msgs)
                    .map(|(mm, sm)| {
                        let mm_complete = mm.files_relative().iter().all(|&p| file_exists(master_ds_root, Some(p)));
                        if mm_complete { (mm, Source::Master) } else { (sm, Source::Slave) }
                    })
                    .group_by(|(_, src)| *src)
                    .into_iter()
                    .map(|(src, group)| (src, group.map(|(m, _)| m).collect_vec()))
                    .collect_vec()
            }
        };

        for (source, mut msgs) in batches {
            let (src_cwd, src_ds_root) = match source {
                Source::Master => (master_cwd, master_ds_root),
                Source::Slave => (slave_cwd, slave_ds_root),
            };
            for m in msgs.iter_mut() {
                fixup_members(m, final_users, src_cwd);
            }
            for chunk in &msgs.into_iter().chunks(BATCH_SIZE) {
                target_dao.insert_messages(target_ds_uuid, new_chat, chunk.collect_vec(), src_ds_root)?;
            }
        }
    }
    Ok(Outcome::Done(()))
}

/// Rewrites service-message `members` fields to match the final, post-merge user list; members
/// that don't resolve to a known user are left as-is (could be someone who's since left the chat).
fn fixup_members(msg: &mut Message, final_users: &[User], cwd: &ChatWithDetails) {
    fn resolve(members: &[String], final_users: &[User], cwd: &ChatWithDetails) -> Vec<String> {
        cwd.resolve_members(members).iter().enumerate()
            .map(|(i, resolved)| {
                resolved.and_then(|u| final_users.iter().find(|fu| fu.id == u.id))
                    .map(|fu| fu.pretty_name())
                    .unwrap_or_else(|| members[i].clone())
            })
            .collect_vec()
    }

    if let Typed::Service(ms) = &mut msg.typed {
        match ms {
            MessageService::PhoneCall { members, .. } => *members = resolve(members.as_slice(), final_users, cwd),
            MessageService::GroupCreate { members, .. } => *members = resolve(members.as_slice(), final_users, cwd),
            MessageService::GroupInviteMembers { members } => *members = resolve(members.as_slice(), final_users, cwd),
            MessageService::GroupRemoveMembers { members } => *members = resolve(members.as_slice(), final_users, cwd),
            MessageService::GroupMigrateFrom { members, .. } => *members = resolve(members.as_slice(), final_users, cwd),
            MessageService::GroupCall { members } => *members = resolve(members.as_slice(), final_users, cwd),
            _ => {}
        }
    }
}
