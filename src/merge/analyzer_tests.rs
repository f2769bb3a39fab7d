use pretty_assertions::assert_eq;

use crate::dao::in_memory_dao::InMemoryDao;
use crate::utils::{CancellationToken, DatasetRoot};

use super::*;

fn regular(internal_id: i64, source_id: Option<i64>, ts: i64, text: &str) -> Message {
    Message::new(MessageInternalId(internal_id), source_id.map(MessageSourceId), Timestamp(ts),
                 UserId(1), vec![RichText::make_plain(text.to_owned())],
                 Typed::Regular(MessageRegular {
                     edit_time_option: None, forward_from_name_option: None,
                     reply_to_source_id_option: None, content_option: None,
                 }))
}

fn photo(internal_id: i64, source_id: i64, ts: i64, path_option: Option<String>) -> Message {
    Message::new(MessageInternalId(internal_id), Some(MessageSourceId(source_id)), Timestamp(ts),
                 UserId(1), vec![],
                 Typed::Regular(MessageRegular {
                     edit_time_option: None, forward_from_name_option: None,
                     reply_to_source_id_option: None,
                     content_option: Some(Content::Photo { path_option, width: 10, height: 10 }),
                 }))
}

fn build_dao(root: &str, msgs: Vec<Message>) -> (InMemoryDao, PbUuid, ChatWithDetails) {
    let ds_uuid = PbUuid::random();
    let user = User {
        ds_uuid, id: UserId(1),
        first_name_option: Some("Me".to_owned()), last_name_option: None,
        username_option: None, phone_number_option: None,
    };
    let chat = Chat {
        ds_uuid, id: ChatId(1), name_option: Some("Chat".to_owned()),
        tpe: ChatType::PrivateGroup, img_path_option: None, member_ids: vec![UserId(1)],
        msg_count: msgs.len() as i32,
    };
    let dataset = Dataset { uuid: ds_uuid, alias: root.to_owned(), source_type: "test".to_owned() };
    let ds_root = DatasetRoot(std::path::PathBuf::from(format!("/tmp/analyzer-tests-{root}")));
    let cwd = ChatWithDetails { chat: chat.clone(), last_msg_option: msgs.last().cloned(), members: vec![user.clone()] };
    let dao = InMemoryDao::new(root.to_owned(), ds_root.0.clone())
        .with_dataset(dataset, ds_root, user.id, vec![user], vec![(chat, msgs)]);
    (dao, ds_uuid, cwd)
}

fn analyze(master_msgs: Vec<Message>, slave_msgs: Vec<Message>) -> Result<Outcome<Vec<DiffSegment>>> {
    let (master_dao, master_uuid, master_cwd) = build_dao("master", master_msgs);
    let (slave_dao, slave_uuid, slave_cwd) = build_dao("slave", slave_msgs);
    let analyzer = DatasetDiffAnalyzer::new(&master_dao, &master_uuid, &slave_dao, &slave_uuid)?;
    analyzer.analyze(&master_cwd, &slave_cwd, "test", &CancellationToken::new())
}

fn m(id: i64) -> MasterInternalId { MasterInternalId(MessageInternalId(id)) }
fn s(id: i64) -> SlaveInternalId { SlaveInternalId(MessageInternalId(id)) }

/// S1 - identity.
#[test]
fn identical_streams_are_one_match() -> Result<()> {
    let msgs = vec![regular(1, Some(1), 1, "hi"), regular(2, Some(2), 2, "yo")];
    let result = analyze(msgs.clone(), msgs)?;
    assert_eq!(result, Outcome::Done(vec![
        DiffSegment::Match { first_master_msg_id: m(1), last_master_msg_id: m(2), first_slave_msg_id: s(1), last_slave_msg_id: s(2) },
    ]));
    Ok(())
}

/// S2 - append.
#[test]
fn slave_appends_new_messages() -> Result<()> {
    let master = vec![regular(1, Some(1), 1, "a"), regular(2, Some(2), 2, "b")];
    let slave = vec![regular(1, Some(1), 1, "a"), regular(2, Some(2), 2, "b"),
                      regular(3, Some(3), 3, "c"), regular(4, Some(4), 4, "d")];
    let result = analyze(master, slave)?;
    assert_eq!(result, Outcome::Done(vec![
        DiffSegment::Match { first_master_msg_id: m(1), last_master_msg_id: m(2), first_slave_msg_id: s(1), last_slave_msg_id: s(2) },
        DiffSegment::Add { first_slave_msg_id: s(3), last_slave_msg_id: s(4) },
    ]));
    Ok(())
}

/// S3 - prepend and append.
#[test]
fn slave_prepends_and_appends() -> Result<()> {
    let master = vec![regular(1, Some(3), 3, "c")];
    let slave = vec![regular(1, Some(1), 1, "a"), regular(2, Some(2), 2, "b"),
                      regular(3, Some(3), 3, "c"), regular(4, Some(4), 4, "d")];
    let result = analyze(master, slave)?;
    assert_eq!(result, Outcome::Done(vec![
        DiffSegment::Add { first_slave_msg_id: s(1), last_slave_msg_id: s(2) },
        DiffSegment::Match { first_master_msg_id: m(1), last_master_msg_id: m(1), first_slave_msg_id: s(3), last_slave_msg_id: s(3) },
        DiffSegment::Add { first_slave_msg_id: s(4), last_slave_msg_id: s(4) },
    ]));
    Ok(())
}

/// S4 - same source_id, differing text is a genuine conflict.
#[test]
fn same_source_id_differing_text_is_a_conflict() -> Result<()> {
    let master = vec![regular(1, Some(5), 100, "a")];
    let slave = vec![regular(1, Some(5), 100, "b")];
    let result = analyze(master, slave)?;
    assert_eq!(result, Outcome::Done(vec![
        DiffSegment::Replace { first_master_msg_id: m(1), last_master_msg_id: m(1), first_slave_msg_id: s(1), last_slave_msg_id: s(1) },
    ]));
    Ok(())
}

/// S5 - slave introduces media master never had -> forced Replace, not Match.
#[test]
fn new_media_on_slave_is_a_replace_not_a_match() -> Result<()> {
    let master = vec![photo(1, 7, 100, Some("p.jpg".to_owned()))];
    let slave = vec![photo(1, 7, 100, Some("p.jpg".to_owned()))];

    let (master_dao, master_uuid, master_cwd) = build_dao("s5-master", master);
    let (slave_dao, slave_uuid, slave_cwd) = build_dao("s5-slave", slave);
    let slave_root = slave_dao.dataset_root(&slave_uuid)?;
    std::fs::create_dir_all(&slave_root.0)?;
    std::fs::write(slave_root.0.join("p.jpg"), vec![0u8; 42])?;

    let analyzer = DatasetDiffAnalyzer::new(&master_dao, &master_uuid, &slave_dao, &slave_uuid)?;
    let result = analyzer.analyze(&master_cwd, &slave_cwd, "s5", &CancellationToken::new())?;
    assert_eq!(result, Outcome::Done(vec![
        DiffSegment::Replace { first_master_msg_id: m(1), last_master_msg_id: m(1), first_slave_msg_id: s(1), last_slave_msg_id: s(1) },
    ]));
    Ok(())
}

/// S6 - a pure timezone shift between otherwise-identical datasets is a fatal error.
#[test]
fn time_shift_between_datasets_is_fatal() {
    let master = vec![regular(1, Some(9), 1000, "x")];
    let slave = vec![regular(1, Some(9), 1000 + 3600, "x")];
    let err = analyze(master, slave).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("ahead of master by 3600 sec"), "unexpected message: {msg}");
}

/// S7 - no source_ids: ordering falls back to (timestamp, searchable_string).
#[test]
fn retain_then_add_when_ordered_by_timestamp_only() -> Result<()> {
    let master = vec![regular(1, None, 1, "a"), regular(2, None, 3, "c")];
    let slave = vec![regular(1, None, 2, "b"), regular(2, None, 3, "c")];
    let result = analyze(master, slave)?;
    assert_eq!(result, Outcome::Done(vec![
        DiffSegment::Retain { first_master_msg_id: m(1), last_master_msg_id: m(1) },
        DiffSegment::Add { first_slave_msg_id: s(1), last_slave_msg_id: s(1) },
        DiffSegment::Match { first_master_msg_id: m(2), last_master_msg_id: m(2), first_slave_msg_id: s(2), last_slave_msg_id: s(2) },
    ]));
    Ok(())
}

#[test]
fn cancellation_stops_analysis_promptly() -> Result<()> {
    let (master_dao, master_uuid, master_cwd) = build_dao("cancel-master", vec![regular(1, Some(1), 1, "a")]);
    let (slave_dao, slave_uuid, slave_cwd) = build_dao("cancel-slave", vec![regular(1, Some(1), 1, "a")]);
    let analyzer = DatasetDiffAnalyzer::new(&master_dao, &master_uuid, &slave_dao, &slave_uuid)?;
    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let result = analyzer.analyze(&master_cwd, &slave_cwd, "cancel", &cancellation)?;
    assert_eq!(result, Outcome::Cancelled);
    Ok(())
}
