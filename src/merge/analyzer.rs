//! Diff engine: walks a master and a slave message stream in lockstep and emits an
//! ordered partitioning of both into `Match` / `Retain` / `Add` / `Replace` segments.

use std::cmp::Ordering;

use crate::dao::ChatHistoryDao;
use crate::entities::equality::{PracticalEq, PracticalEqTuple};
use crate::entities::*;
use crate::ids::*;
use crate::merge::stream::messages_stream;
use crate::merge::{MasterMessage, SlaveMessage, WithTypedId};
use crate::require;
use crate::utils::{file_exists, measure, CancellationToken, DatasetRoot, FileHashCache, Outcome, Result};

#[cfg(test)]
#[path = "analyzer_tests.rs"]
mod tests;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffSegment {
    Match { first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId,
            first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId },
    Retain { first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId },
    Add { first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId },
    Replace { first_master_msg_id: MasterInternalId, last_master_msg_id: MasterInternalId,
              first_slave_msg_id: SlaveInternalId, last_slave_msg_id: SlaveInternalId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum InProgress {
    Match { first_master_msg_id: MasterInternalId, first_slave_msg_id: SlaveInternalId },
    Retain { first_master_msg_id: MasterInternalId },
    Add { first_slave_msg_id: SlaveInternalId },
    Replace { first_master_msg_id: MasterInternalId, first_slave_msg_id: SlaveInternalId },
}

impl InProgress {
    fn finish(&self, last_m: Option<MasterInternalId>, last_s: Option<SlaveInternalId>) -> DiffSegment {
        match *self {
            InProgress::Match { first_master_msg_id, first_slave_msg_id } => DiffSegment::Match {
                first_master_msg_id, last_master_msg_id: last_m.unwrap(),
                first_slave_msg_id, last_slave_msg_id: last_s.unwrap(),
            },
            InProgress::Retain { first_master_msg_id } => DiffSegment::Retain {
                first_master_msg_id, last_master_msg_id: last_m.unwrap(),
            },
            InProgress::Add { first_slave_msg_id } => DiffSegment::Add {
                first_slave_msg_id, last_slave_msg_id: last_s.unwrap(),
            },
            InProgress::Replace { first_master_msg_id, first_slave_msg_id } => DiffSegment::Replace {
                first_master_msg_id, last_master_msg_id: last_m.unwrap(),
                first_slave_msg_id, last_slave_msg_id: last_s.unwrap(),
            },
        }
    }
}

pub struct DatasetDiffAnalyzer<'a> {
    m_dao: &'a dyn ChatHistoryDao,
    m_root: DatasetRoot,
    s_dao: &'a dyn ChatHistoryDao,
    s_root: DatasetRoot,
    cache: FileHashCache,
}

impl<'a> DatasetDiffAnalyzer<'a> {
    pub fn new(m_dao: &'a dyn ChatHistoryDao, m_ds_uuid: &PbUuid,
               s_dao: &'a dyn ChatHistoryDao, s_ds_uuid: &PbUuid) -> Result<Self> {
        let m_root = m_dao.dataset_root(m_ds_uuid)?;
        let s_root = s_dao.dataset_root(s_ds_uuid)?;
        Ok(DatasetDiffAnalyzer { m_dao, m_root, s_dao, s_root, cache: FileHashCache::new() })
    }

    /// Conflicts are only detectable when both sides supply `source_id`s.
    pub fn analyze(&self, master_cwd: &ChatWithDetails, slave_cwd: &ChatWithDetails,
                   title: &str, cancellation: &CancellationToken) -> Result<Outcome<Vec<DiffSegment>>> {
        measure(|| {
            self.analyze_inner(Context {
                mm_stream: messages_stream(self.m_dao, &master_cwd.chat, MasterMessage, |m| m)?,
                m_cwd: master_cwd,
                sm_stream: messages_stream(self.s_dao, &slave_cwd.chat, SlaveMessage, |m| m)?,
                s_cwd: slave_cwd,
            }, cancellation)
        }, |r, t| if r.is_ok() { log::info!("chat {title} analyzed in {t} ms") })
    }

    fn analyze_inner(&self, mut cx: Context, cancellation: &CancellationToken) -> Result<Outcome<Vec<DiffSegment>>> {
        let mut state: Option<InProgress> = None;
        let mut acc: Vec<DiffSegment> = vec![];

        loop {
            if cancellation.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let (mm, sm) = cx.peek();
            match (mm, sm, &state) {
                (None, None, None) => break,

                (Some(m), Some(s), None) if self.content_aware_matches(m, cx.m_cwd, s, cx.s_cwd)? => {
                    let (mm, sm) = cx.advance_both();
                    state = Some(InProgress::Match { first_master_msg_id: mm.typed_id(), first_slave_msg_id: sm.typed_id() });
                }

                (Some(m), Some(s), None) if self.is_migrate_from_widening(m, cx.m_cwd, s, cx.s_cwd)? => {
                    let (mm, sm) = cx.advance_both();
                    acc.push(DiffSegment::Replace {
                        first_master_msg_id: mm.typed_id(), last_master_msg_id: mm.typed_id(),
                        first_slave_msg_id: sm.typed_id(), last_slave_msg_id: sm.typed_id(),
                    });
                }

                (Some(m), Some(s), None) if m.source_id_option.is_some() && m.source_id_option == s.source_id_option => {
                    self.check_time_shift(m, cx.m_cwd, s, cx.s_cwd)?;
                    let (mm, sm) = cx.advance_both();
                    state = Some(InProgress::Replace { first_master_msg_id: mm.typed_id(), first_slave_msg_id: sm.typed_id() });
                }

                (_, Some(_), None) if cx.cmp_master_slave()?.is_gt() => {
                    let sm = cx.advance_slave();
                    state = Some(InProgress::Add { first_slave_msg_id: sm.typed_id() });
                }

                (Some(_), _, None) if cx.cmp_master_slave()?.is_lt() => {
                    let mm = cx.advance_master();
                    state = Some(InProgress::Retain { first_master_msg_id: mm.typed_id() });
                }

                (Some(m), Some(s), Some(InProgress::Match { .. })) if self.content_aware_matches(m, cx.m_cwd, s, cx.s_cwd)? => {
                    cx.advance_both();
                }

                (_, Some(_), Some(InProgress::Add { .. })) if cx.cmp_master_slave()?.is_gt() => {
                    cx.advance_slave();
                }

                (Some(_), _, Some(InProgress::Retain { .. })) if cx.cmp_master_slave()?.is_lt() => {
                    cx.advance_master();
                }

                (Some(m), Some(s), Some(InProgress::Replace { .. })) if !self.content_aware_matches(m, cx.m_cwd, s, cx.s_cwd)? => {
                    cx.advance_both();
                }

                (_, _, Some(in_progress)) => {
                    acc.push(in_progress.finish(cx.mm_stream.last_id_option, cx.sm_stream.last_id_option));
                    state = None;
                }

                (mm, sm, None) =>
                    anyhow::bail!("data integrity error: messages {:?} and {:?} are neither ordered nor equal", mm, sm),
            }
        }

        Ok(Outcome::Done(acc))
    }

    /// Telegram widened user ids past 2020-10; a GroupMigrateFrom pair with equal source_id whose
    /// only difference is the id width is folded into a single Replace rather than derailing the
    /// whole chat into Retain/Add noise.
    fn is_migrate_from_widening(&self, mm: &Message, m_cwd: &ChatWithDetails, sm: &Message, s_cwd: &ChatWithDetails) -> Result<bool> {
        if !matches!(mm.typed, Typed::Service(MessageService::GroupMigrateFrom { .. })) { return Ok(false); }
        if !matches!(sm.typed, Typed::Service(MessageService::GroupMigrateFrom { .. })) { return Ok(false); }
        if mm.source_id_option.is_none() || mm.source_id_option != sm.source_id_option { return Ok(false); }
        if !(*mm.from_id < (1i64 << 32) && *sm.from_id >= (1i64 << 32)) { return Ok(false); }

        let mut mm_widened = mm.clone();
        mm_widened.from_id = sm.from_id;
        self.full_practically_equal(&mm_widened, m_cwd, sm, s_cwd)
    }

    /// A conflict aligned by `source_id` might actually be a timezone shift between the two
    /// datasets; detected by substituting slave's timestamp into master and re-testing equality.
    fn check_time_shift(&self, mm: &Message, m_cwd: &ChatWithDetails, sm: &Message, s_cwd: &ChatWithDetails) -> Result<()> {
        let mut mm_shifted = mm.clone();
        mm_shifted.timestamp = sm.timestamp;
        if self.full_practically_equal(&mm_shifted, m_cwd, sm, s_cwd)? {
            let diff_sec = *sm.timestamp - *mm.timestamp;
            require!(diff_sec != 0, "time shift check fired with zero diff");
            let (direction, diff_sec) = if diff_sec > 0 { ("ahead of", diff_sec) } else { ("behind", -diff_sec) };
            anyhow::bail!("time shift detected between datasets! slave is {direction} master by {diff_sec} sec ({} hrs)",
                          diff_sec / 3600);
        }
        Ok(())
    }

    fn full_practically_equal(&self, mm: &Message, m_cwd: &ChatWithDetails, sm: &Message, s_cwd: &ChatWithDetails) -> Result<bool> {
        PracticalEqTuple::new(mm, &self.m_root, m_cwd, &self.cache)
            .practically_equals(&PracticalEqTuple::new(sm, &self.s_root, s_cwd, &self.cache))
    }

    /// The relaxed equality the diff engine uses to decide whether two messages are the "same"
    /// message across snapshots: content is blanked out of the comparison except for the one
    /// asymmetric case where slave introduced a file master never had, which forces a Replace so
    /// the merge executor picks up the new content.
    fn content_aware_matches(&self, mm: &Message, m_cwd: &ChatWithDetails, sm: &Message, s_cwd: &ChatWithDetails) -> Result<bool> {
        match (&mm.typed, &sm.typed) {
            (Typed::Regular(mr), Typed::Regular(sr)) => {
                if let (Some(mc), Some(sc)) = (&mr.content_option, &sr.content_option) {
                    if Self::is_new_content(mc.primary_path_option(), &self.m_root, sc.primary_path_option(), &self.s_root) {
                        return Ok(false);
                    }
                }
                let mm_blank = blank_content(mm, mr);
                let sm_blank = blank_content(sm, sr);
                self.full_practically_equal(&mm_blank, m_cwd, &sm_blank, s_cwd)
            }
            (Typed::Service(MessageService::GroupEditPhoto { photo_path_option: mp }),
             Typed::Service(MessageService::GroupEditPhoto { photo_path_option: sp })) => {
                if Self::is_new_content(mp.as_deref(), &self.m_root, sp.as_deref(), &self.s_root) {
                    return Ok(false);
                }
                Ok(mm.timestamp == sm.timestamp && mm.from_id == sm.from_id && mm.text == sm.text)
            }
            _ => self.full_practically_equal(mm, m_cwd, sm, s_cwd),
        }
    }

    fn is_new_content(m_path: Option<&str>, m_root: &DatasetRoot, s_path: Option<&str>, s_root: &DatasetRoot) -> bool {
        !file_exists(m_root, m_path) && file_exists(s_root, s_path)
    }
}

fn blank_content(m: &Message, r: &MessageRegular) -> Message {
    Message {
        typed: Typed::Regular(MessageRegular { content_option: None, edit_time_option: None, ..r.clone() }),
        ..m.clone()
    }
}

struct Context<'a> {
    mm_stream: crate::merge::stream::BatchedMessageIterator<'a, MasterMessage>,
    m_cwd: &'a ChatWithDetails,
    sm_stream: crate::merge::stream::BatchedMessageIterator<'a, SlaveMessage>,
    s_cwd: &'a ChatWithDetails,
}

impl<'a> Context<'a> {
    fn peek(&self) -> (Option<&Message>, Option<&Message>) {
        (self.mm_stream.peek().map(|m| &m.0), self.sm_stream.peek().map(|m| &m.0))
    }

    /// Total order driving advancement when `source_id`s don't pin the alignment: by timestamp,
    /// then by `source_id` if both sides have one, then equal if searchable strings agree.
    /// Anything else is a data-integrity error, surfaced rather than silently misordered.
    fn cmp_master_slave(&self) -> Result<Ordering> {
        match (self.mm_stream.peek(), self.sm_stream.peek()) {
            (None, None) => Ok(Ordering::Equal),
            (None, _) => Ok(Ordering::Greater),
            (_, None) => Ok(Ordering::Less),
            (Some(mm), Some(sm)) => {
                if mm.timestamp != sm.timestamp {
                    Ok(mm.timestamp.cmp(&sm.timestamp))
                } else if let (Some(m_src), Some(s_src)) = (mm.source_id_option, sm.source_id_option) {
                    Ok(m_src.cmp(&s_src))
                } else if mm.searchable_string == sm.searchable_string {
                    Ok(Ordering::Equal)
                } else {
                    anyhow::bail!("cannot order messages {:?} and {:?}: same timestamp, no comparable source_id, differing text",
                                  mm.0, sm.0);
                }
            }
        }
    }

    fn advance_both(&mut self) -> (MasterMessage, SlaveMessage) {
        (self.advance_master(), self.advance_slave())
    }

    fn advance_master(&mut self) -> MasterMessage {
        self.mm_stream.next().expect("empty master stream advanced")
    }

    fn advance_slave(&mut self) -> SlaveMessage {
        self.sm_stream.next().expect("empty slave stream advanced")
    }
}
