use core::{
    cell::RefCell,
    future::poll_fn,
    task::Poll,
};

use atomic_waker::AtomicWaker;
use embassy_sync::blocking_mutex;
use heapless::Deque;
use portable_atomic::{AtomicU32, Ordering};

use crate::DefaultRawMutex;

/// A bounded FIFO, which makes room for new items by discarding the oldest one.
///
/// There may be any number of producers, but only one consumer task and only one task waiting
/// for space or for the queue to drain at a time, since each of them is tracked by a single
/// waker.
pub struct DropOldestQueue<T, const N: usize> {
    items: blocking_mutex::Mutex<DefaultRawMutex, RefCell<Deque<T, N>>>,
    /// Woken when an item is pushed.
    consumer_waker: AtomicWaker,
    /// Woken when an item is popped.
    producer_waker: AtomicWaker,
    dropped: AtomicU32,
}
impl<T, const N: usize> DropOldestQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            items: blocking_mutex::Mutex::new(RefCell::new(Deque::new())),
            consumer_waker: AtomicWaker::new(),
            producer_waker: AtomicWaker::new(),
            dropped: AtomicU32::new(0),
        }
    }
    /// Push an item, discarding the oldest one if the queue is full.
    ///
    /// Returns false, if an item had to be discarded.
    pub fn push(&self, item: T) -> bool {
        let had_room = self.items.lock(|items| {
            let mut items = items.borrow_mut();
            let had_room = if items.is_full() {
                let _ = items.pop_front();
                false
            } else {
                true
            };
            // There is room now.
            let _ = items.push_back(item);
            had_room
        });
        if !had_room {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.consumer_waker.wake();
        had_room
    }
    /// Push an item, if there is room for it.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.items
            .lock(|items| items.borrow_mut().push_back(item))?;
        self.consumer_waker.wake();
        Ok(())
    }
    /// Asynchronously wait for room and push the item without discarding anything.
    pub async fn push_wait(&self, item: T) {
        let mut item = Some(item);
        poll_fn(|cx| {
            self.producer_waker.register(cx.waker());
            let Some(pending) = item.take() else {
                return Poll::Ready(());
            };
            match self.try_push(pending) {
                Ok(()) => Poll::Ready(()),
                Err(pending) => {
                    item = Some(pending);
                    Poll::Pending
                }
            }
        })
        .await
    }
    /// Take the oldest item out of the queue, if there is one.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.lock(|items| items.borrow_mut().pop_front());
        if item.is_some() {
            self.producer_waker.wake();
        }
        item
    }
    /// Asynchronously wait for the next item.
    pub async fn pop(&self) -> T {
        poll_fn(|cx| {
            self.consumer_waker.register(cx.waker());
            match self.try_pop() {
                Some(item) => Poll::Ready(item),
                None => Poll::Pending,
            }
        })
        .await
    }
    /// Asynchronously wait until every queued item was taken by the consumer.
    pub async fn wait_drained(&self) {
        poll_fn(|cx| {
            self.producer_waker.register(cx.waker());
            if self.is_empty() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
    pub fn len(&self) -> usize {
        self.items.lock(|items| items.borrow().len())
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The amount of items discarded to make room, since the queue was created.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}
impl<T, const N: usize> Default for DropOldestQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::{block_on, join::join};

    #[test]
    fn drops_oldest_when_full() {
        let queue = DropOldestQueue::<u8, 3>::new();
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert!(!queue.push(4));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), Some(4));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn try_push_refuses_when_full() {
        let queue = DropOldestQueue::<u8, 1>::new();
        assert_eq!(queue.try_push(1), Ok(()));
        assert_eq!(queue.try_push(2), Err(2));
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn push_wait_waits_for_consumer() {
        let queue = DropOldestQueue::<u8, 2>::new();
        let producer = async {
            for i in 0..10 {
                queue.push_wait(i).await;
            }
        };
        let consumer = async {
            let mut received = heapless::Vec::<u8, 10>::new();
            while received.len() < 10 {
                received.push(queue.pop().await).unwrap();
            }
            received
        };
        let ((), received) = block_on(join(producer, consumer));
        assert_eq!(received.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn wait_drained_completes_once_empty() {
        let queue = DropOldestQueue::<u8, 4>::new();
        queue.push(1);
        queue.push(2);
        let consumer = async {
            queue.pop().await;
            queue.pop().await;
        };
        block_on(join(queue.wait_drained(), consumer));
        assert!(queue.is_empty());
    }
}
