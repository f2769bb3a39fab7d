//! Typed data model: datasets, users, chats, messages, rich text, content.
//!
//! `Message` and `Content` are tagged enums rather than a class hierarchy, with
//! equality/searchable-string/file-enumeration logic living next to the variants that need it.

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::ids::*;

pub mod equality;

pub const UNNAMED: &str = "[unnamed]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PbUuid(pub Uuid);

impl PbUuid {
    pub fn random() -> Self { PbUuid(Uuid::new_v4()) }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub uuid: PbUuid,
    pub alias: String,
    pub source_type: String,
}

/// Equality is by UUID only, per the data model.
impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool { self.uuid == other.uuid }
}
impl Eq for Dataset {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub ds_uuid: PbUuid,
    pub id: UserId,
    pub first_name_option: Option<String>,
    pub last_name_option: Option<String>,
    pub username_option: Option<String>,
    pub phone_number_option: Option<String>,
}

impl User {
    pub fn pretty_name_option(&self) -> Option<String> {
        match (self.first_name_option.as_ref(), self.last_name_option.as_ref(), self.phone_number_option.as_ref()) {
            (Some(first_name), Some(last_name), _) => Some(format!("{first_name} {last_name}")),
            (Some(first_name), None, _) => Some(first_name.clone()),
            (None, Some(last_name), _) => Some(last_name.clone()),
            (None, None, Some(phone_number)) => Some(phone_number.clone()),
            (None, None, None) => None,
        }
    }

    pub fn pretty_name(&self) -> String {
        self.pretty_name_option().unwrap_or_else(|| UNNAMED.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Personal,
    PrivateGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub ds_uuid: PbUuid,
    pub id: ChatId,
    pub name_option: Option<String>,
    pub tpe: ChatType,
    pub img_path_option: Option<String>,
    pub member_ids: Vec<UserId>,
    pub msg_count: i32,
}

impl Chat {
    pub fn qualified_name(&self) -> String {
        format!("'{}' (#{})", self.name_option.as_deref().unwrap_or(UNNAMED), *self.id)
    }
}

/// A chat paired with its last message and member users (self first).
#[derive(Debug, Clone)]
pub struct ChatWithDetails {
    pub chat: Chat,
    pub last_msg_option: Option<Message>,
    pub members: Vec<User>,
}

impl ChatWithDetails {
    pub fn resolve_member(&self, member_name: &str) -> Option<&User> {
        self.members.iter().find(|m| m.pretty_name() == member_name)
    }

    pub fn resolve_members<'a>(&'a self, member_names: &[String]) -> Vec<Option<&'a User>> {
        member_names.iter().map(|mn| self.resolve_member(mn)).collect_vec()
    }
}

//
// Rich text
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichTextElement {
    pub searchable_string: String,
    pub val: RteVal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RteVal {
    Plain(String),
    Bold(String),
    Italic(String),
    Underline(String),
    Strikethrough(String),
    Link { text_option: Option<String>, href: String, hidden: bool },
    PrefmtInline(String),
    PrefmtBlock { text: String, language_option: Option<String> },
}

fn normalize_searchable_string(s: &str) -> String {
    lazy_static! {
        // \p{Z} is any separator (including   no-break space);
        // \p{Cf} is any invisible formatting character (including ​ zero-width space).
        static ref NORMALIZE_REGEX: Regex = Regex::new(r"[\p{Z}\p{Cf}\n]+").unwrap();
    }
    NORMALIZE_REGEX.replace_all(s, " ").trim().to_owned()
}

pub struct RichText;

impl RichText {
    pub fn make_plain(text: String) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::Plain(text) }
    }

    pub fn make_bold(text: String) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::Bold(text) }
    }

    pub fn make_italic(text: String) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::Italic(text) }
    }

    pub fn make_underline(text: String) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::Underline(text) }
    }

    pub fn make_strikethrough(text: String) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::Strikethrough(text) }
    }

    pub fn make_link(text_option: Option<String>, href: String, hidden: bool) -> RichTextElement {
        let text = text_option.as_deref().unwrap_or("");
        let searchable_string = if text == href {
            href.clone()
        } else {
            format!("{text} {href}").trim().to_owned()
        };
        let searchable_string = normalize_searchable_string(&searchable_string);
        RichTextElement { searchable_string, val: RteVal::Link { text_option, href, hidden } }
    }

    pub fn make_prefmt_inline(text: String) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::PrefmtInline(text) }
    }

    pub fn make_prefmt_block(text: String, language_option: Option<String>) -> RichTextElement {
        let searchable_string = normalize_searchable_string(&text);
        RichTextElement { searchable_string, val: RteVal::PrefmtBlock { text, language_option } }
    }
}

//
// Content
//

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Sticker { path_option: Option<String>, thumbnail_path_option: Option<String>, emoji_option: Option<String> },
    Photo { path_option: Option<String>, width: i32, height: i32 },
    VoiceMsg { path_option: Option<String>, mime_type_option: Option<String>, duration_sec_option: Option<i32> },
    Audio { path_option: Option<String>, title_option: Option<String>, performer_option: Option<String>, duration_sec_option: Option<i32> },
    VideoMsg { path_option: Option<String>, thumbnail_path_option: Option<String>, duration_sec_option: Option<i32> },
    Video { path_option: Option<String>, thumbnail_path_option: Option<String>, title_option: Option<String>, performer_option: Option<String>, duration_sec_option: Option<i32> },
    Animation { path_option: Option<String>, thumbnail_path_option: Option<String>, duration_sec_option: Option<i32> },
    File { path_option: Option<String>, thumbnail_path_option: Option<String>, mime_type_option: Option<String>, title_option: Option<String>, performer_option: Option<String> },
    Location { title_option: Option<String>, address_option: Option<String>, lat_str: String, lon_str: String, duration_sec_option: Option<i32> },
    Poll { question: String },
    SharedContact { first_name_option: Option<String>, last_name_option: Option<String>, phone_number_option: Option<String>, vcard_path_option: Option<String> },
}

impl Content {
    /// All dataset-root-relative paths this content references (path, thumbnail, vcard - whatever applies).
    pub fn paths(&self) -> Vec<&str> {
        use Content::*;
        let opts: Vec<Option<&str>> = match self {
            Sticker { path_option, thumbnail_path_option, .. } =>
                vec![path_option.as_deref(), thumbnail_path_option.as_deref()],
            Photo { path_option, .. } => vec![path_option.as_deref()],
            VoiceMsg { path_option, .. } => vec![path_option.as_deref()],
            Audio { path_option, .. } => vec![path_option.as_deref()],
            VideoMsg { path_option, thumbnail_path_option, .. } =>
                vec![path_option.as_deref(), thumbnail_path_option.as_deref()],
            Video { path_option, thumbnail_path_option, .. } =>
                vec![path_option.as_deref(), thumbnail_path_option.as_deref()],
            Animation { path_option, thumbnail_path_option, .. } =>
                vec![path_option.as_deref(), thumbnail_path_option.as_deref()],
            File { path_option, thumbnail_path_option, .. } =>
                vec![path_option.as_deref(), thumbnail_path_option.as_deref()],
            Location { .. } => vec![],
            Poll { .. } => vec![],
            SharedContact { vcard_path_option, .. } => vec![vcard_path_option.as_deref()],
        };
        opts.into_iter().flatten().collect()
    }

    /// The single "primary" path used by the diff engine's new-content rule, if this variant
    /// has exactly one such path (every path-bearing variant does).
    pub fn primary_path_option(&self) -> Option<&str> {
        self.paths().into_iter().next()
    }
}

//
// Message
//

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRegular {
    pub edit_time_option: Option<Timestamp>,
    pub forward_from_name_option: Option<String>,
    pub reply_to_source_id_option: Option<MessageSourceId>,
    pub content_option: Option<Content>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageService {
    PhoneCall { duration_sec_option: Option<i32>, discard_reason_option: Option<String>, members: Vec<String> },
    PinMessage { message_source_id: MessageSourceId },
    ClearHistory,
    StatusTextChanged,
    Notice,
    GroupCreate { title: String, members: Vec<String> },
    GroupEditTitle { title: String },
    GroupEditPhoto { photo_path_option: Option<String> },
    GroupDeletePhoto,
    GroupInviteMembers { members: Vec<String> },
    GroupRemoveMembers { members: Vec<String> },
    GroupMigrateFrom { title: String, members: Vec<String> },
    GroupMigrateTo,
    GroupCall { members: Vec<String> },
    SuggestProfilePhoto { photo_path_option: Option<String> },
    BlockUser { is_blocked: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Typed {
    Regular(MessageRegular),
    Service(MessageService),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub internal_id: MessageInternalId,
    pub source_id_option: Option<MessageSourceId>,
    pub timestamp: Timestamp,
    pub from_id: UserId,
    pub text: Vec<RichTextElement>,
    pub searchable_string: String,
    pub typed: Typed,
}

impl Message {
    pub fn new(internal_id: MessageInternalId,
               source_id_option: Option<MessageSourceId>,
               timestamp: Timestamp,
               from_id: UserId,
               text: Vec<RichTextElement>,
               typed: Typed) -> Self {
        let searchable_string = make_searchable_string(&text, &typed);
        Message { internal_id, source_id_option, timestamp, from_id, text, searchable_string, typed }
    }

    /// All dataset-root-relative paths this message references.
    pub fn files_relative(&self) -> Vec<&str> {
        match &self.typed {
            Typed::Regular(MessageRegular { content_option: Some(c), .. }) => c.paths(),
            Typed::Regular(MessageRegular { content_option: None, .. }) => vec![],
            Typed::Service(ms) => match ms {
                MessageService::GroupEditPhoto { photo_path_option } => photo_path_option.as_deref().into_iter().collect(),
                MessageService::SuggestProfilePhoto { photo_path_option } => photo_path_option.as_deref().into_iter().collect(),
                _ => vec![],
            },
        }
    }
}

pub fn make_searchable_string(components: &[RichTextElement], typed: &Typed) -> String {
    let joined_text: String = components.iter()
        .map(|rte| &rte.searchable_string)
        .filter(|s| !s.is_empty())
        .join(" ");

    let typed_component_text: Vec<String> = match typed {
        Typed::Regular(MessageRegular { content_option, .. }) => match content_option {
            Some(Content::Sticker { emoji_option, .. }) => emoji_option.iter().cloned().collect_vec(),
            Some(Content::Audio { title_option, performer_option, .. }) =>
                vec![title_option, performer_option].into_iter().flatten().cloned().collect_vec(),
            Some(Content::Video { title_option, performer_option, .. }) =>
                vec![title_option, performer_option].into_iter().flatten().cloned().collect_vec(),
            Some(Content::File { title_option, .. }) => title_option.iter().cloned().collect_vec(),
            Some(Content::Location { address_option, title_option, lat_str, lon_str, .. }) => {
                let mut v = vec![address_option, title_option].into_iter().flatten().cloned().collect_vec();
                v.push(lat_str.clone());
                v.push(lon_str.clone());
                v
            }
            Some(Content::Poll { question }) => vec![question.clone()],
            Some(Content::SharedContact { first_name_option, last_name_option, phone_number_option, .. }) =>
                vec![first_name_option, last_name_option, phone_number_option].into_iter().flatten().cloned().collect_vec(),
            _ => vec![],
        },
        Typed::Service(ms) => match ms {
            MessageService::GroupCreate { title, members } =>
                vec![vec![title.clone()], members.clone()].into_iter().flatten().collect_vec(),
            MessageService::GroupInviteMembers { members } => members.clone(),
            MessageService::GroupRemoveMembers { members } => members.clone(),
            MessageService::GroupMigrateFrom { title, .. } => vec![title.clone()],
            MessageService::GroupCall { members } => members.clone(),
            _ => vec![],
        },
    };

    [joined_text, typed_component_text.join(" ")].iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .join(" ")
        .trim()
        .to_owned()
}
