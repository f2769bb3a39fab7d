//! Practical equality (`=~=`): entity equality used everywhere merge compares messages across
//! DAOs. Different from full equality:
//! 1. Internal IDs are ignored.
//! 2. External content paths might differ BUT the content itself must match byte-for-byte.
//! 3. "Forwarded from" name is ignored (its changes aren't related to the message itself).

use std::collections::HashSet;

use crate::entities::*;
use crate::ids::UserId;
use crate::utils::{files_practically_equal, DatasetRoot, FileHashCache, Result};

pub trait PracticalEq<Rhs = Self> {
    fn practically_equals(&self, other: &Rhs) -> Result<bool>;
}

pub struct PracticalEqTuple<'a, T> {
    pub v: &'a T,
    pub ds_root: &'a DatasetRoot,
    pub cwd: &'a ChatWithDetails,
    pub cache: &'a FileHashCache,
}

type Tup<'a, T> = PracticalEqTuple<'a, T>;

impl<'a, T> Tup<'a, T> {
    pub fn new(v: &'a T, ds_root: &'a DatasetRoot, cwd: &'a ChatWithDetails, cache: &'a FileHashCache) -> Self {
        Self { v, ds_root, cwd, cache }
    }

    pub fn with<U>(&self, u: &'a U) -> Tup<'a, U> {
        Tup::new(u, self.ds_root, self.cwd, self.cache)
    }
}

impl<'a, T> PracticalEq for Tup<'a, Option<T>> where for<'b> Tup<'a, T>: PracticalEq {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        match (self.v, other.v) {
            (None, None) => Ok(true),
            (Some(v1), Some(v2)) => self.with(v1).practically_equals(&other.with(v2)),
            _ => Ok(false),
        }
    }
}

//
// Chat
//

impl<'a> PracticalEq for Tup<'a, Chat> {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        let members_eq = self.v.member_ids.len() == other.v.member_ids.len()
            && self.v.member_ids.iter().all(|e| other.v.member_ids.contains(e));
        let img_eq = files_practically_equal(
            self.cache, self.ds_root, self.v.img_path_option.as_deref(),
            other.ds_root, other.v.img_path_option.as_deref());
        Ok(self.v.name_option == other.v.name_option
            && self.v.tpe == other.v.tpe
            && self.v.msg_count == other.v.msg_count
            && members_eq
            && img_eq)
    }
}

//
// Message
//

impl<'a> PracticalEq for Tup<'a, Message> {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        if self.v.timestamp != other.v.timestamp || self.v.from_id != other.v.from_id || self.v.text != other.v.text {
            return Ok(false);
        }
        self.with(&self.v.typed).practically_equals(&other.with(&other.v.typed))
    }
}

impl<'a> PracticalEq for Tup<'a, Typed> {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        match (self.v, other.v) {
            (Typed::Regular(c1), Typed::Regular(c2)) => self.with(c1).practically_equals(&other.with(c2)),
            (Typed::Service(c1), Typed::Service(c2)) => self.with(c1).practically_equals(&other.with(c2)),
            _ => Ok(false),
        }
    }
}

impl<'a> PracticalEq for Tup<'a, MessageRegular> {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        if self.v.reply_to_source_id_option != other.v.reply_to_source_id_option
            || self.v.edit_time_option != other.v.edit_time_option {
            return Ok(false);
        }
        // forward_from_name_option is ignored here; see the module doc comment.
        self.with(&self.v.content_option).practically_equals(&other.with(&other.v.content_option))
    }
}

impl<'a> PracticalEq for Tup<'a, MessageService> {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        use MessageService::*;
        match (self.v, other.v) {
            (GroupCreate { title: t1, members: m1 }, GroupCreate { title: t2, members: m2 }) =>
                Ok(t1 == t2 && members_practically_equal(m1, self.cwd, m2, other.cwd)),
            (GroupInviteMembers { members: m1 }, GroupInviteMembers { members: m2 }) =>
                Ok(members_practically_equal(m1, self.cwd, m2, other.cwd)),
            (GroupRemoveMembers { members: m1 }, GroupRemoveMembers { members: m2 }) =>
                Ok(members_practically_equal(m1, self.cwd, m2, other.cwd)),
            (GroupCall { members: m1 }, GroupCall { members: m2 }) =>
                Ok(members_practically_equal(m1, self.cwd, m2, other.cwd)),
            (GroupEditPhoto { photo_path_option: p1 }, GroupEditPhoto { photo_path_option: p2 }) =>
                Ok(files_practically_equal(self.cache, self.ds_root, p1.as_deref(), other.ds_root, p2.as_deref())),
            (SuggestProfilePhoto { photo_path_option: p1 }, SuggestProfilePhoto { photo_path_option: p2 }) =>
                Ok(files_practically_equal(self.cache, self.ds_root, p1.as_deref(), other.ds_root, p2.as_deref())),
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => Ok(a == b),
            _ => Ok(false),
        }
    }
}

fn members_practically_equal(members1: &[String], cwd1: &ChatWithDetails,
                              members2: &[String], cwd2: &ChatWithDetails) -> bool {
    fn resolve_ids(members: &[String], cwd: &ChatWithDetails) -> HashSet<Option<UserId>> {
        cwd.resolve_members(members).iter().map(|o| o.map(|u| u.id)).collect()
    }
    resolve_ids(members1, cwd1) == resolve_ids(members2, cwd2)
}

//
// Content
//

impl<'a> PracticalEq for Tup<'a, Content> {
    fn practically_equals(&self, other: &Self) -> Result<bool> {
        use Content::*;
        let paths_eq = |p1: Option<&str>, p2: Option<&str>|
            files_practically_equal(self.cache, self.ds_root, p1, other.ds_root, p2);
        match (self.v, other.v) {
            (Sticker { path_option: p1, thumbnail_path_option: tp1, emoji_option: e1 },
                Sticker { path_option: p2, thumbnail_path_option: tp2, emoji_option: e2 }) =>
                Ok(e1 == e2 && paths_eq(p1.as_deref(), p2.as_deref()) && paths_eq(tp1.as_deref(), tp2.as_deref())),

            (Photo { path_option: p1, width: w1, height: h1 },
                Photo { path_option: p2, width: w2, height: h2 }) =>
                Ok(w1 == w2 && h1 == h2 && paths_eq(p1.as_deref(), p2.as_deref())),

            (VoiceMsg { path_option: p1, mime_type_option: m1, duration_sec_option: d1 },
                VoiceMsg { path_option: p2, mime_type_option: m2, duration_sec_option: d2 }) =>
                Ok(m1 == m2 && d1 == d2 && paths_eq(p1.as_deref(), p2.as_deref())),

            (Audio { path_option: p1, title_option: t1, performer_option: perf1, duration_sec_option: d1 },
                Audio { path_option: p2, title_option: t2, performer_option: perf2, duration_sec_option: d2 }) =>
                Ok(t1 == t2 && perf1 == perf2 && d1 == d2 && paths_eq(p1.as_deref(), p2.as_deref())),

            (VideoMsg { path_option: p1, thumbnail_path_option: tp1, duration_sec_option: d1 },
                VideoMsg { path_option: p2, thumbnail_path_option: tp2, duration_sec_option: d2 }) =>
                Ok(d1 == d2 && paths_eq(p1.as_deref(), p2.as_deref()) && paths_eq(tp1.as_deref(), tp2.as_deref())),

            (Video { path_option: p1, thumbnail_path_option: tp1, title_option: t1, performer_option: perf1, duration_sec_option: d1 },
                Video { path_option: p2, thumbnail_path_option: tp2, title_option: t2, performer_option: perf2, duration_sec_option: d2 }) =>
                Ok(t1 == t2 && perf1 == perf2 && d1 == d2
                    && paths_eq(p1.as_deref(), p2.as_deref()) && paths_eq(tp1.as_deref(), tp2.as_deref())),

            (Animation { path_option: p1, thumbnail_path_option: tp1, duration_sec_option: d1 },
                Animation { path_option: p2, thumbnail_path_option: tp2, duration_sec_option: d2 }) =>
                Ok(d1 == d2 && paths_eq(p1.as_deref(), p2.as_deref()) && paths_eq(tp1.as_deref(), tp2.as_deref())),

            (File { path_option: p1, thumbnail_path_option: tp1, mime_type_option: m1, title_option: t1, performer_option: perf1 },
                File { path_option: p2, thumbnail_path_option: tp2, mime_type_option: m2, title_option: t2, performer_option: perf2 }) =>
                Ok(m1 == m2 && t1 == t2 && perf1 == perf2
                    && paths_eq(p1.as_deref(), p2.as_deref()) && paths_eq(tp1.as_deref(), tp2.as_deref())),

            (Location { title_option: t1, address_option: a1, lat_str: la1, lon_str: lo1, duration_sec_option: d1 },
                Location { title_option: t2, address_option: a2, lat_str: la2, lon_str: lo2, duration_sec_option: d2 }) => {
                // lat/lon are strings; trailing zeros etc. should be ignored, so compare parsed.
                let lat1: f64 = la1.parse()?;
                let lat2: f64 = la2.parse()?;
                let lon1: f64 = lo1.parse()?;
                let lon2: f64 = lo2.parse()?;
                Ok(t1 == t2 && a1 == a2 && d1 == d2 && lat1 == lat2 && lon1 == lon2)
            }

            // We don't care about the poll's answer tally, only its question.
            (Poll { question: q1 }, Poll { question: q2 }) => Ok(q1 == q2),

            (SharedContact { first_name_option: f1, last_name_option: l1, phone_number_option: p1, vcard_path_option: v1 },
                SharedContact { first_name_option: f2, last_name_option: l2, phone_number_option: p2, vcard_path_option: v2 }) =>
                Ok(f1 == f2 && l1 == l2 && p1 == p2 && paths_eq(v1.as_deref(), v2.as_deref())),

            _ => Ok(false),
        }
    }
}
