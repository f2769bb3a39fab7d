//! Lazy, restartable message stream over a DAO: fetched in fixed batches, never
//! materializing a whole chat. Used by the diff engine to walk master and slave in lockstep.

use crate::dao::ChatHistoryDao;
use crate::entities::{Chat, Message};
use crate::merge::WithTypedId;
use crate::utils::Result;

pub const BATCH_SIZE: usize = 1000;

pub fn messages_stream<'a, T: WithTypedId>(
    dao: &'a dyn ChatHistoryDao,
    chat: &'a Chat,
    wrap: fn(Message) -> T,
    unwrap_ref: fn(&T) -> &Message,
) -> Result<BatchedMessageIterator<'a, T>> {
    let mut saved_batch = dao.first_messages(chat, BATCH_SIZE)?.into_iter();
    let next_option = saved_batch.next().map(wrap);
    Ok(BatchedMessageIterator { dao, chat, wrap, unwrap_ref, saved_batch, next_option, last_id_option: None })
}

/// Pull-based iterator that re-fetches the next batch from the DAO once the current one is
/// exhausted, so a full chat is never held in memory at once.
pub struct BatchedMessageIterator<'a, T: WithTypedId> {
    dao: &'a dyn ChatHistoryDao,
    chat: &'a Chat,
    wrap: fn(Message) -> T,
    unwrap_ref: fn(&T) -> &Message,
    saved_batch: std::vec::IntoIter<Message>,
    next_option: Option<T>,
    pub last_id_option: Option<T::Item>,
}

impl<'a, T: WithTypedId> BatchedMessageIterator<'a, T> {
    pub fn peek(&self) -> Option<&T> {
        self.next_option.as_ref()
    }
}

impl<'a, T: WithTypedId> Iterator for BatchedMessageIterator<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next_option.take();
        if let Some(ref current) = current {
            match self.saved_batch.next() {
                Some(next) => self.next_option = Some((self.wrap)(next)),
                None => {
                    self.saved_batch = self.dao
                        .messages_after(self.chat, (self.unwrap_ref)(current).internal_id, BATCH_SIZE + 1)
                        .expect("message stream errored out mid-iteration")
                        .into_iter();
                    // The DAO call is inclusive of `current`; drop it, we've already yielded it.
                    self.saved_batch.next();
                    self.next_option = self.saved_batch.next().map(self.wrap);
                }
            }
        }
        self.last_id_option = current.as_ref().map(|m| m.typed_id());
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::in_memory_dao::InMemoryDao;
    use crate::entities::*;
    use crate::ids::*;
    use crate::merge::MasterMessage;
    use crate::utils::DatasetRoot;
    use std::path::PathBuf;

    fn regular_msg(internal_id: i64, source_id: i64) -> Message {
        Message::new(MessageInternalId(internal_id), Some(MessageSourceId(source_id)), Timestamp(source_id),
                     UserId(1), vec![RichText::make_plain(format!("msg {source_id}"))],
                     Typed::Regular(MessageRegular {
                         edit_time_option: None, forward_from_name_option: None,
                         reply_to_source_id_option: None, content_option: None,
                     }))
    }

    #[test]
    fn stream_rebatches_across_boundaries() -> Result<()> {
        let msgs = (1..=5).map(|i| regular_msg(i, i)).collect::<Vec<_>>();
        let user = User {
            ds_uuid: PbUuid::random(), id: UserId(1),
            first_name_option: Some("Me".to_owned()), last_name_option: None,
            username_option: None, phone_number_option: None,
        };
        let chat = Chat {
            ds_uuid: user.ds_uuid, id: ChatId(1), name_option: Some("Chat".to_owned()),
            tpe: ChatType::PrivateGroup, img_path_option: None, member_ids: vec![UserId(1)], msg_count: 5,
        };
        let dataset = Dataset { uuid: user.ds_uuid, alias: "ds".to_owned(), source_type: "test".to_owned() };
        let dao = InMemoryDao::new("test".to_owned(), PathBuf::from("/tmp/test-stream"))
            .with_dataset(dataset, DatasetRoot(PathBuf::from("/tmp/test-stream")), user.id,
                          vec![user], vec![(chat.clone(), msgs)]);

        let stream = messages_stream(&dao, &chat, MasterMessage, |m| m)?;
        let mut seen = vec![];
        for m in stream {
            seen.push(*m.0.internal_id);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        Ok(())
    }
}
