use std::path::PathBuf;

use pretty_assertions::assert_eq;

use crate::dao::in_memory_dao::InMemoryDao;
use crate::utils::CancellationToken;

use super::*;

fn user(ds_uuid: PbUuid, id: i64, first_name: &str) -> User {
    User {
        ds_uuid, id: UserId(id),
        first_name_option: Some(first_name.to_owned()), last_name_option: None,
        username_option: None, phone_number_option: None,
    }
}

fn chat(ds_uuid: PbUuid, id: i64, tpe: ChatType, member_ids: Vec<i64>, msg_count: i32) -> Chat {
    Chat {
        ds_uuid, id: ChatId(id), name_option: Some(format!("chat {id}")), tpe,
        img_path_option: None, member_ids: member_ids.into_iter().map(UserId).collect(),
        msg_count,
    }
}

fn regular(internal_id: i64, ts: i64, from_id: i64, text: &str) -> Message {
    Message::new(MessageInternalId(internal_id), None, Timestamp(ts), UserId(from_id),
                 vec![RichText::make_plain(text.to_owned())],
                 Typed::Regular(MessageRegular {
                     edit_time_option: None, forward_from_name_option: None,
                     reply_to_source_id_option: None, content_option: None,
                 }))
}

fn photo(internal_id: i64, from_id: i64, path: &str) -> Message {
    Message::new(MessageInternalId(internal_id), None, Timestamp(1), UserId(from_id), vec![],
                 Typed::Regular(MessageRegular {
                     edit_time_option: None, forward_from_name_option: None,
                     reply_to_source_id_option: None,
                     content_option: Some(Content::Photo { path_option: Some(path.to_owned()), width: 1, height: 1 }),
                 }))
}

fn group_create(internal_id: i64, from_id: i64, members: Vec<String>) -> Message {
    Message::new(MessageInternalId(internal_id), None, Timestamp(1), UserId(from_id), vec![],
                 Typed::Service(MessageService::GroupCreate { title: "grp".to_owned(), members }))
}

fn build(root_name: &str, ds_uuid: PbUuid, myself_id: UserId,
         users: Vec<User>, chats: Vec<(Chat, Vec<Message>)>) -> (InMemoryDao, Dataset) {
    let dataset = Dataset { uuid: ds_uuid, alias: root_name.to_owned(), source_type: "test".to_owned() };
    let root = DatasetRoot(PathBuf::from(format!("/tmp/merger-tests-{root_name}")));
    let dao = InMemoryDao::new(root_name.to_owned(), root.0.clone())
        .with_dataset(dataset.clone(), root, myself_id, users, chats);
    (dao, dataset)
}

fn target(root_name: &str) -> InMemoryDao {
    InMemoryDao::new(root_name.to_owned(), PathBuf::from(format!("/tmp/merger-tests-{root_name}")))
}

fn m(id: i64) -> MasterInternalId { MasterInternalId(MessageInternalId(id)) }
fn s(id: i64) -> SlaveInternalId { SlaveInternalId(MessageInternalId(id)) }

#[test]
fn keep_and_add_chats_copy_messages_from_their_respective_sides() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("keep-add-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice")],
        vec![(chat(master_uuid, 1, ChatType::PrivateGroup, vec![1], 2),
              vec![regular(1, 1, 1, "a"), regular(2, 2, 1, "b")])]);

    let (slave_dao, slave_ds) = build("keep-add-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice")],
        vec![(chat(slave_uuid, 2, ChatType::PrivateGroup, vec![1], 1),
              vec![regular(1, 1, 1, "c")])]);

    let mut target_dao = target("keep-add-target");
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1))],
        vec![ChatMergeOption::Keep { master_chat_id: ChatId(1) }, ChatMergeOption::Add { slave_chat_id: ChatId(2) }],
        &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    let mut chats = target_dao.chats(&new_ds_uuid)?;
    chats.sort_by_key(|cwd| cwd.chat.id.0);
    assert_eq!(chats.len(), 2);

    let msgs0 = target_dao.scroll_messages(&chats[0].chat, 0, 10)?;
    assert_eq!(msgs0.iter().map(|m| m.text[0].val.clone()).collect::<Vec<_>>(),
               vec![RteVal::Plain("a".to_owned()), RteVal::Plain("b".to_owned())]);

    let msgs1 = target_dao.scroll_messages(&chats[1].chat, 0, 10)?;
    assert_eq!(msgs1.iter().map(|m| m.text[0].val.clone()).collect::<Vec<_>>(),
               vec![RteVal::Plain("c".to_owned())]);
    Ok(())
}

#[test]
fn combine_match_segment_carries_the_message_through() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("combine-match-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice")],
        vec![(chat(master_uuid, 3, ChatType::PrivateGroup, vec![1], 1), vec![regular(1, 1, 1, "hi")])]);

    let (slave_dao, slave_ds) = build("combine-match-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice")],
        vec![(chat(slave_uuid, 3, ChatType::PrivateGroup, vec![1], 1), vec![regular(1, 1, 1, "hi")])]);

    let mut target_dao = target("combine-match-target");
    let decisions = vec![MessagesMergeDecision::Match {
        first_master_msg_id: m(1), last_master_msg_id: m(1),
        first_slave_msg_id: s(1), last_slave_msg_id: s(1),
    }];
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1))],
        vec![ChatMergeOption::Combine { chat_id: ChatId(3), message_merges: decisions }],
        &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    let chats = target_dao.chats(&new_ds_uuid)?;
    assert_eq!(chats.len(), 1);
    let msgs = target_dao.scroll_messages(&chats[0].chat, 0, 10)?;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].text[0].val, RteVal::Plain("hi".to_owned()));
    Ok(())
}

#[test]
fn personal_chat_is_renamed_to_the_final_interlocutor_name() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("personal-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice"), user(master_uuid, 2, "Bob Old")],
        vec![(chat(master_uuid, 4, ChatType::Personal, vec![1, 2], 1), vec![regular(1, 1, 2, "hey")])]);

    let (slave_dao, slave_ds) = build("personal-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice"), user(slave_uuid, 2, "Bob New")],
        vec![(chat(slave_uuid, 4, ChatType::Personal, vec![1, 2], 1), vec![regular(1, 1, 2, "hey")])]);

    let mut target_dao = target("personal-target");
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1)), UserMergeOption::Replace(UserId(2))],
        vec![ChatMergeOption::Add { slave_chat_id: ChatId(4) }],
        &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    let chats = target_dao.chats(&new_ds_uuid)?;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].chat.name_option, Some("Bob New".to_owned()));
    Ok(())
}

#[test]
fn group_service_message_members_are_rewritten_to_final_names() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("members-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice"), user(master_uuid, 2, "Bob Old")],
        vec![(chat(master_uuid, 5, ChatType::PrivateGroup, vec![1, 2], 1),
              vec![group_create(1, 1, vec!["Bob Old".to_owned()])])]);

    let (slave_dao, slave_ds) = build("members-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice"), user(slave_uuid, 2, "Bob New")],
        vec![]);

    let mut target_dao = target("members-target");
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1)), UserMergeOption::Replace(UserId(2))],
        vec![ChatMergeOption::Keep { master_chat_id: ChatId(5) }],
        &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    let chats = target_dao.chats(&new_ds_uuid)?;
    let msgs = target_dao.scroll_messages(&chats[0].chat, 0, 10)?;
    match &msgs[0].typed {
        Typed::Service(MessageService::GroupCreate { members, .. }) =>
            assert_eq!(members, &vec!["Bob New".to_owned()]),
        other => panic!("expected GroupCreate, got {other:?}"),
    }
    Ok(())
}

#[test]
fn match_segment_prefers_the_side_whose_file_actually_exists() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let slave_root = PathBuf::from("/tmp/merger-tests-file-pref-slave");
    std::fs::create_dir_all(&slave_root)?;
    std::fs::write(slave_root.join("present.jpg"), vec![7u8; 16])?;

    let (master_dao, master_ds) = build("file-pref-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice")],
        vec![(chat(master_uuid, 6, ChatType::PrivateGroup, vec![1], 1),
              vec![photo(1, 1, "missing.jpg")])]);

    let (slave_dao, slave_ds) = build("file-pref-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice")],
        vec![(chat(slave_uuid, 6, ChatType::PrivateGroup, vec![1], 1),
              vec![photo(1, 1, "present.jpg")])]);

    let mut target_dao = target("file-pref-target");
    let decisions = vec![MessagesMergeDecision::Match {
        first_master_msg_id: m(1), last_master_msg_id: m(1),
        first_slave_msg_id: s(1), last_slave_msg_id: s(1),
    }];
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1))],
        vec![ChatMergeOption::Combine { chat_id: ChatId(6), message_merges: decisions }],
        &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    let chats = target_dao.chats(&new_ds_uuid)?;
    let msgs = target_dao.scroll_messages(&chats[0].chat, 0, 10)?;
    match &msgs[0].typed {
        Typed::Regular(MessageRegular { content_option: Some(Content::Photo { path_option, .. }), .. }) =>
            assert_eq!(path_option.as_deref(), Some("present.jpg")),
        other => panic!("expected a photo, got {other:?}"),
    }

    let new_root = target_dao.dataset_root(&new_ds_uuid)?;
    assert!(new_root.to_absolute("present.jpg").exists());
    Ok(())
}

#[test]
fn keeping_a_chat_reproduces_the_master_dataset_exactly() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("equal-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice")],
        vec![(chat(master_uuid, 7, ChatType::PrivateGroup, vec![1], 2),
              vec![regular(1, 1, 1, "a"), regular(2, 2, 1, "b")])]);
    let (slave_dao, slave_ds) = build("equal-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice")], vec![]);

    let mut target_dao = target("equal-target");
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1))],
        vec![ChatMergeOption::Keep { master_chat_id: ChatId(7) }],
        &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    crate::dao::ensure_datasets_are_equal(&master_dao, &master_ds.uuid, &target_dao, &new_ds_uuid)
}

#[test]
fn merge_keeps_master_users_left_unmentioned_in_the_merge_list() -> Result<()> {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("augment-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice"), user(master_uuid, 2, "Bob")], vec![]);
    let (slave_dao, slave_ds) = build("augment-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice")], vec![]);

    let mut target_dao = target("augment-target");
    // Only master's self user is mentioned; master user 2 ("Bob") is left out and must still
    // end up in the target, carried over as a Keep.
    let outcome = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1))], vec![], &CancellationToken::new())?;
    let new_ds_uuid = match outcome { Outcome::Done(uuid) => uuid, Outcome::Cancelled => panic!("cancelled") };

    let mut users = target_dao.users(&new_ds_uuid)?;
    users.sort_by_key(|u| u.id.0);
    assert_eq!(users.iter().map(|u| u.first_name_option.clone()).collect::<Vec<_>>(),
               vec![Some("Alice".to_owned()), Some("Bob".to_owned())]);
    Ok(())
}

#[test]
fn merge_rejects_user_merges_that_omit_a_slave_user() {
    let master_uuid = PbUuid::random();
    let slave_uuid = PbUuid::random();

    let (master_dao, master_ds) = build("reject-master", master_uuid, UserId(1),
        vec![user(master_uuid, 1, "Alice")], vec![]);
    let (slave_dao, slave_ds) = build("reject-slave", slave_uuid, UserId(1),
        vec![user(slave_uuid, 1, "Alice"), user(slave_uuid, 2, "Carol")], vec![]);

    let mut target_dao = target("reject-target");
    let result = merge_datasets(&master_dao, &master_ds, &slave_dao, &slave_ds, &mut target_dao,
        vec![UserMergeOption::Replace(UserId(1))], vec![], &CancellationToken::new());
    assert!(result.is_err());
}
