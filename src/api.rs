/**
 * 文件描述: 查询上下文模块，为上层 API 提供按请求合并的批量查询
 * 功能概述:
 * - 同一轮轮询内发出的单键查询合并为一次按键批量查询
 * - 查询结果在上下文生命周期内缓存
 * - 提供交易创建者等关联解析
 *
 * 主要组件:
 * - BatchLoader: 通用的合并批量加载器
 * - QueryContext: 每个请求一个，由 ProjectionStore::fork() 创建
 */

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures::future::{try_join_all, BoxFuture, Shared};
use futures::FutureExt;
use log::debug;
use tokio::sync::oneshot;
use crate::db::ProjectionStore;
use crate::error::IndexerError;
use crate::models::{Account, Block, Peer, Role, TransactionRecord};

type BatchResult<V> = Result<Vec<Option<V>>, IndexerError>;
type BatchFn<K, V> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, BatchResult<V>> + Send + Sync>;
type BatchValues<K, V> = Result<Arc<HashMap<K, Option<V>>>, IndexerError>;
type PendingBatch<K, V> = Shared<BoxFuture<'static, BatchValues<K, V>>>;

/// 正在收集键、尚未发出的批次
struct OpenBatch<K, V> {
    id: u64,
    keys: Vec<K>,
    sender: oneshot::Sender<BatchValues<K, V>>,
    pending: PendingBatch<K, V>,
}

impl<K, V> OpenBatch<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn new(id: u64) -> Self {
        let (sender, receiver) = oneshot::channel();
        let pending = receiver
            .map(|received| {
                received.unwrap_or_else(|_| Err(IndexerError::Internal("批量查询任务已被取消".to_string())))
            })
            .boxed()
            .shared();
        OpenBatch { id, keys: Vec::new(), sender, pending }
    }
}

struct LoaderState<K, V> {
    cache: HashMap<K, Option<V>>,
    /// 已登记但结果未返回的键，重复请求等待同一个批次
    in_flight: HashMap<K, (u64, PendingBatch<K, V>)>,
    open: Option<OpenBatch<K, V>>,
    next_batch_id: u64,
}

/// 合并批量加载器。
///
/// 未命中缓存的 load 把键登记到当前打开的批次，然后让出一次执行权。
/// 同一任务在这一轮轮询中发出的其他 load 都会先完成登记，
/// 任一等待者被再次轮询时关闭批次，对去重后的键调用一次批量函数。
/// 批次的划分只取决于请求任务自身的轮询顺序，与运行时的工作线程数无关。
pub struct BatchLoader<K, V> {
    batch_fn: BatchFn<K, V>,
    state: Arc<Mutex<LoaderState<K, V>>>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        BatchLoader { batch_fn: self.batch_fn.clone(), state: self.state.clone() }
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// 批量函数的返回值必须与传入的键按位置对齐
    pub fn new<F>(batch_fn: F) -> Self
    where
        F: Fn(Vec<K>) -> BoxFuture<'static, BatchResult<V>> + Send + Sync + 'static,
    {
        BatchLoader {
            batch_fn: Arc::new(batch_fn),
            state: Arc::new(Mutex::new(LoaderState {
                cache: HashMap::new(),
                in_flight: HashMap::new(),
                open: None,
                next_batch_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn load(&self, key: K) -> Result<Option<V>, IndexerError> {
        let (batch_id, pending) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if let Some(cached) = state.cache.get(&key) {
                return Ok(cached.clone());
            }
            match state.in_flight.get(&key).cloned() {
                Some(registered) => registered,
                None => {
                    let next_batch_id = &mut state.next_batch_id;
                    let open = state.open.get_or_insert_with(|| {
                        let id = *next_batch_id;
                        *next_batch_id += 1;
                        OpenBatch::new(id)
                    });
                    open.keys.push(key.clone());
                    let registered = (open.id, open.pending.clone());
                    state.in_flight.insert(key.clone(), registered.clone());
                    registered
                }
            }
        };

        // 让同一轮轮询中的其他 load 先完成登记
        tokio::task::yield_now().await;
        self.dispatch(batch_id);

        let values = pending.await?;
        Ok(values.get(&key).cloned().flatten())
    }

    /// 并发加载多个键，结果与输入对齐
    pub async fn load_many(&self, keys: Vec<K>) -> Result<Vec<Option<V>>, IndexerError> {
        try_join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// 关闭仍处于打开状态的 `batch_id` 批次并在后台执行；批次已发出时什么也不做
    fn dispatch(&self, batch_id: u64) {
        let batch = {
            let mut state = self.lock();
            match state.open.take() {
                Some(open) if open.id == batch_id => open,
                other => {
                    state.open = other;
                    return;
                }
            }
        };
        tokio::spawn(self.clone().run_batch(batch));
    }

    async fn run_batch(self, batch: OpenBatch<K, V>) {
        let OpenBatch { keys, sender, .. } = batch;
        debug!("合并 {} 个键为一次批量查询", keys.len());

        let result = (self.batch_fn)(keys.clone()).await;
        let outcome = {
            let mut state = self.lock();
            for key in &keys {
                state.in_flight.remove(key);
            }
            result.map(|values| {
                let mut values = values.into_iter();
                let resolved: HashMap<K, Option<V>> =
                    keys.into_iter().map(|key| (key, values.next().flatten())).collect();
                for (key, value) in &resolved {
                    state.cache.insert(key.clone(), value.clone());
                }
                Arc::new(resolved)
            })
        };
        let _ = sender.send(outcome);
    }
}

fn store_loader<K, V, F, Fut>(store: &ProjectionStore, lookup: F) -> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(ProjectionStore, Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<V>> + Send + 'static,
{
    let store = store.clone();
    BatchLoader::new(move |keys| lookup(store.clone(), keys).boxed())
}

/// 单个请求的查询上下文
pub struct QueryContext {
    store: ProjectionStore,
    pub blocks: BatchLoader<u64, Block>,
    pub transactions: BatchLoader<String, TransactionRecord>,
    pub accounts: BatchLoader<String, Account>,
    pub peers: BatchLoader<String, Peer>,
    pub roles: BatchLoader<String, Role>,
}

impl QueryContext {
    pub fn new(store: ProjectionStore) -> Self {
        QueryContext {
            blocks: store_loader(&store, |store, heights| async move { store.blocks_by_height(heights).await }),
            transactions: store_loader(&store, |store, hashes| async move {
                store.transactions_by_hash(hashes).await
            }),
            accounts: store_loader(&store, |store, ids| async move { store.accounts_by_id(ids).await }),
            peers: store_loader(&store, |store, keys| async move { store.peers_by_public_key(keys).await }),
            roles: store_loader(&store, |store, names| async move { store.roles_by_name(names).await }),
            store,
        }
    }

    pub fn store(&self) -> &ProjectionStore {
        &self.store
    }

    /// 交易的创建账户
    pub async fn transaction_creator(&self, record: &TransactionRecord) -> Result<Option<Account>, IndexerError> {
        self.accounts
            .load(record.transaction.creator_account_id().to_string())
            .await
    }

    /// 交易所在区块
    pub async fn transaction_block(&self, record: &TransactionRecord) -> Result<Option<Block>, IndexerError> {
        self.blocks.load(record.block_height).await
    }
}

impl ProjectionStore {
    /// 为一个请求创建独立的查询上下文，缓存不跨请求共享
    pub fn fork(&self) -> QueryContext {
        QueryContext::new(self.clone())
    }
}
