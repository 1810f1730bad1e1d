//! Ordered message log for one conversation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::common::{Message, MessageId, MessageStatus};
use crate::error::Result;

use super::delivery::{self, Transition};

/// One link of the newest-first list. Older links are shared, never copied.
struct Node {
    message: Arc<Message>,
    older: Option<Arc<Node>>,
}

impl Drop for Node {
    // Unlink iteratively so dropping a long history cannot overflow the stack.
    fn drop(&mut self) {
        let mut older = self.older.take();
        while let Some(node) = older {
            match Arc::try_unwrap(node) {
                Ok(mut node) => older = node.older.take(),
                Err(_) => break,
            }
        }
    }
}

/// Messages in receipt order.
///
/// The log is a persistent list with the newest message at its head:
/// appending links one node in front and snapshots hold the head they saw,
/// so neither ever copies existing entries. Status changes go through the
/// shared message and show up in every snapshot that contains it.
#[derive(Default)]
pub struct MessageStore {
    head: Option<Arc<Node>>,
    len: usize,
    index: HashMap<MessageId, Arc<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `message` as the most recent entry. Returns `false` and leaves
    /// the store untouched if a message with the same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.index.contains_key(message.id()) {
            log::debug!("Ignoring duplicate message {}", message.id());
            return false;
        }
        let message = Arc::new(message);
        self.index.insert(message.id().clone(), Arc::clone(&message));
        self.head = Some(Arc::new(Node {
            message,
            older: self.head.take(),
        }));
        self.len += 1;
        true
    }

    /// Applies `status` to the message with `id`.
    ///
    /// Unknown ids yield `Ok(None)`: a status update may race with the
    /// message itself and must not fail loudly.
    pub fn update_status(
        &mut self,
        id: &MessageId,
        status: MessageStatus,
    ) -> Result<Option<Transition>> {
        let Some(message) = self.index.get(id) else {
            log::debug!("Status update for unknown message {id}");
            return Ok(None);
        };

        let outcome = delivery::transition(message.status(), status)?;
        if let Transition::Advanced { .. } = outcome {
            message.set_status(status);
        }
        Ok(Some(outcome))
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(Arc::as_ref)
    }

    /// Most recently appended message.
    pub fn latest(&self) -> Option<&Message> {
        self.head.as_deref().map(|node| node.message.as_ref())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStore").field("len", &self.len).finish()
    }
}

/// Newest-first view of a store at one point in time.
///
/// Later appends never show up in it. Nothing is copied until iterated, and
/// every call to [`Snapshot::iter`] starts again from the newest message.
#[derive(Clone)]
pub struct Snapshot {
    head: Option<Arc<Node>>,
    len: usize,
}

impl Snapshot {
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.as_deref(),
            remaining: self.len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn newest(&self) -> Option<&Message> {
        self.head.as_deref().map(|node| node.message.as_ref())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Message;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Walks a [`Snapshot`] from newest to oldest.
pub struct Iter<'a> {
    next: Option<&'a Node>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.older.as_deref();
        self.remaining -= 1;
        Some(node.message.as_ref())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
