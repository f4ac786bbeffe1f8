/**
 * 文件描述: 顺序队列，把乱序、可能重复到达的条目整理成严格按索引递增的消费序列
 * 功能概述:
 * - push: 拒绝过期或重复的索引，接受的条目按索引有序缓存
 * - next: 等待索引等于 next_index 的条目就绪，不会自动前进
 * - pop: 消费就绪条目并把 next_index 加一
 *
 * 追赶扫描和实时订阅会同时向同一个队列推送区块，同一高度可能到达两次；
 * 队列只按索引去重，先到者生效，不比较内容。
 */

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type IndexFn<T> = Box<dyn Fn(&T) -> u64 + Send + Sync>;

struct QueueState<T> {
    items: BTreeMap<u64, T>,
    next_index: u64,
    waiters: Vec<oneshot::Sender<T>>,
}

impl<T: Clone> QueueState<T> {
    /// 索引为 next_index 的条目就绪时，一次性唤醒所有等待者
    fn notify_waiters(&mut self) {
        if let Some(item) = self.items.get(&self.next_index) {
            for waiter in self.waiters.drain(..) {
                // 等待者可能已被丢弃
                let _ = waiter.send(item.clone());
            }
        }
    }
}

pub struct SequentialQueue<T> {
    index_of: IndexFn<T>,
    state: Mutex<QueueState<T>>,
}

impl<T: Clone> SequentialQueue<T> {
    pub fn new<F>(index_of: F, next_index: u64) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        SequentialQueue {
            index_of: Box::new(index_of),
            state: Mutex::new(QueueState {
                items: BTreeMap::new(),
                next_index,
                waiters: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 推入条目，返回是否被接受。过期或重复的索引被静默丢弃。
    pub fn push(&self, item: T) -> bool {
        let index = (self.index_of)(&item);
        let mut state = self.lock();
        if index < state.next_index || state.items.contains_key(&index) {
            return false;
        }
        state.items.insert(index, item);
        state.notify_waiters();
        true
    }

    /// 等待索引等于 next_index 的条目。
    ///
    /// 等待者在调用时立即登记；同时登记的多个等待者会拿到同一个条目。
    pub fn next(&self) -> NextItem<T> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock();
        state.waiters.retain(|waiter| !waiter.is_closed());
        state.waiters.push(sender);
        state.notify_waiters();
        NextItem { receiver }
    }

    /// 若最小的缓存条目正是 next_index，则移除它并前进
    pub fn pop(&self) -> bool {
        let mut state = self.lock();
        let expected = state.next_index;
        let lowest = state.items.first_key_value().map(|(&index, _)| index);
        if lowest != Some(expected) {
            return false;
        }
        state.items.remove(&expected);
        state.next_index += 1;
        state.notify_waiters();
        true
    }

    pub fn next_index(&self) -> u64 {
        self.lock().next_index
    }

    pub fn buffered(&self) -> usize {
        self.lock().items.len()
    }
}

/// `next()` 返回的单次完成的 future；队列被丢弃时结果为 None
pub struct NextItem<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Future for NextItem<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| result.ok())
    }
}
