// Copyright 2023 Ring Exchange Network Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! FIFO queues for hand-off records, named by queue.

use serde::de::DeserializeOwned;
use serde::Serialize;

use ring_relayer_utils::Result;

use super::{decode, encode, InMemoryStore, SledStore};

/// A Queue Store is a simple trait that helps storing items in a FIFO queue.
///
/// The submitter parks admitted rings here; a shipping task drains them.
pub trait QueueStore<Item>: Send + Sync
where
    Item: Serialize + DeserializeOwned + Clone,
{
    /// Insert an item into the named queue.
    fn enqueue_item(&self, queue: &str, item: Item) -> Result<()>;
    /// Get an item from the queue, and remove it.
    fn dequeue_item(&self, queue: &str) -> Result<Option<Item>>;
    /// Get an item from the queue, without removing it.
    fn peek_item(&self, queue: &str) -> Result<Option<Item>>;
    /// Number of items parked in the queue.
    fn queue_len(&self, queue: &str) -> Result<usize>;
}

impl<Item> QueueStore<Item> for InMemoryStore
where
    Item: Serialize + DeserializeOwned + Clone,
{
    fn enqueue_item(&self, queue: &str, item: Item) -> Result<()> {
        self.queue_push(queue, encode(&item)?);
        Ok(())
    }

    fn dequeue_item(&self, queue: &str) -> Result<Option<Item>> {
        self.queue_pop(queue).map(|bytes| decode(&bytes)).transpose()
    }

    fn peek_item(&self, queue: &str) -> Result<Option<Item>> {
        self.queue_front(queue)
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn queue_len(&self, queue: &str) -> Result<usize> {
        Ok(self.queue_count(queue))
    }
}

impl<Item> QueueStore<Item> for SledStore
where
    Item: Serialize + DeserializeOwned + Clone,
{
    fn enqueue_item(&self, queue: &str, item: Item) -> Result<()> {
        let tree = self.queue_tree(queue)?;
        // monotonically increasing keys keep insertion order.
        let id = self.next_queue_id()?;
        tree.insert(id.to_be_bytes(), encode(&item)?)?;
        Ok(())
    }

    fn dequeue_item(&self, queue: &str) -> Result<Option<Item>> {
        let tree = self.queue_tree(queue)?;
        match tree.pop_min()? {
            Some((_, bytes)) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn peek_item(&self, queue: &str) -> Result<Option<Item>> {
        let tree = self.queue_tree(queue)?;
        match tree.first()? {
            Some((_, bytes)) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn queue_len(&self, queue: &str) -> Result<usize> {
        Ok(self.queue_tree(queue)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_are_fifo_on_both_backends() {
        let mem = InMemoryStore::default();
        let sled = SledStore::temporary().unwrap();
        for store in [&mem as &dyn QueueStore<u64>, &sled as &dyn QueueStore<u64>] {
            store.enqueue_item("test", 1).unwrap();
            store.enqueue_item("test", 2).unwrap();
            assert_eq!(store.queue_len("test").unwrap(), 2);
            assert_eq!(store.peek_item("test").unwrap(), Some(1));
            assert_eq!(store.dequeue_item("test").unwrap(), Some(1));
            assert_eq!(store.dequeue_item("test").unwrap(), Some(2));
            assert_eq!(store.dequeue_item("test").unwrap(), None);
        }
    }
}
