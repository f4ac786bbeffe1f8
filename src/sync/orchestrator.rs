/**
 * 文件描述: 同步编排，把追赶扫描与实时订阅合流后按高度顺序写入投影
 * 功能概述:
 * - 读取已投影的区块数 H，从 H+1 开始恢复
 * - 先建立区块订阅，再启动追赶扫描，两者并发向同一个顺序队列推送
 * - 单一消费者循环按高度严格递增地应用区块，不跳号、不重复
 * - stop() 取消订阅、通知扫描停止，并在当前区块应用完成后退出
 *
 * 任何来自扫描、订阅或 apply_block 的错误都会终止整个同步，
 * 重连与重试由调用方决定。
 */

use std::ops::ControlFlow;
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use crate::blockchain::{ChainClient, LedgerTransport};
use crate::db::ProjectionStore;
use crate::error::IndexerError;
use crate::models::Block;
use crate::queue::SequentialQueue;

/// 每应用多少个区块输出一次进度
const PROGRESS_INTERVAL: u64 = 100;

/// 运行中的同步任务句柄
pub struct SyncHandle {
    stop: SyncStopper,
    task: JoinHandle<Result<(), IndexerError>>,
}

/// 可以交给其他任务（例如信号处理）的停止开关
#[derive(Clone)]
pub struct SyncStopper {
    stop: Arc<watch::Sender<bool>>,
}

impl SyncStopper {
    /// 请求停止；已经开始的区块应用会先完成
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl SyncHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stopper(&self) -> SyncStopper {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 等待同步任务结束，返回其结果
    pub async fn wait(self) -> Result<(), IndexerError> {
        self.task.await?
    }
}

/// 在后台启动同步
pub fn start_sync<T: LedgerTransport>(client: Arc<ChainClient<T>>, store: ProjectionStore) -> SyncHandle {
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let result = run_sync(client, store, stop_rx).await;
        match &result {
            Ok(()) => info!("同步已停止"),
            Err(e) => error!("同步异常终止: {}", e),
        }
        result
    });
    SyncHandle { stop: SyncStopper { stop: Arc::new(stop) }, task }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

async fn run_sync<T: LedgerTransport>(
    client: Arc<ChainClient<T>>,
    store: ProjectionStore,
    mut stop: watch::Receiver<bool>,
) -> Result<(), IndexerError> {
    if stop_requested(&stop) {
        return Ok(());
    }
    let first_height = store.block_count().await? + 1;
    if stop_requested(&stop) {
        return Ok(());
    }
    info!("开始同步，从高度 {} 恢复", first_height);

    let queue = Arc::new(SequentialQueue::new(|block: &Block| block.height(), first_height));

    // 订阅必须先于扫描建立，否则扫描结束到订阅生效之间提交的区块会丢失
    let mut subscription = {
        let queue = queue.clone();
        client
            .fetch_commit(move |block| {
                if !queue.push(block) {
                    debug!("订阅推送的区块已在队列中或已应用，忽略");
                }
            })
            .await?
    };

    let mut scan = {
        let client = client.clone();
        let queue = queue.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            client
                .scan_blocks(first_height, move |block| {
                    queue.push(block);
                    let flow = if stop_requested(&stop) { ControlFlow::Break(()) } else { ControlFlow::Continue(()) };
                    async move { flow }
                })
                .await
        })
    };

    let mut subscription_finished = false;
    let mut scan_finished = false;

    let result = loop {
        let next = queue.next();
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || stop_requested(&stop) {
                    info!("收到停止请求，下一个待应用高度: {}", queue.next_index());
                    break Ok(());
                }
            }
            outcome = &mut subscription, if !subscription_finished => {
                subscription_finished = true;
                match outcome {
                    Ok(()) => break Ok(()),
                    Err(e) => {
                        warn!("区块订阅失败: {}", e);
                        break Err(e);
                    }
                }
            }
            scanned = &mut scan, if !scan_finished => {
                scan_finished = true;
                match scanned {
                    Ok(Ok(count)) => debug!("追赶扫描完成，共推送 {} 个区块", count),
                    Ok(Err(e)) => break Err(e),
                    Err(e) => break Err(e.into()),
                }
            }
            item = next => {
                let Some(block) = item else {
                    break Err(IndexerError::Internal("顺序队列已关闭".to_string()));
                };
                let height = block.height();
                if let Err(e) = store.apply_block(block).await {
                    error!("应用区块 {} 失败: {}", height, e);
                    break Err(e);
                }
                queue.pop();
                if height % PROGRESS_INTERVAL == 0 {
                    info!("已同步到高度 {}，队列缓存 {} 个区块", height, queue.buffered());
                }
            }
        }
    };

    subscription.end();
    if !subscription_finished {
        if let Err(e) = subscription.await {
            debug!("结束区块订阅时出错: {}", e);
        }
    }
    if !scan_finished {
        scan.abort();
    }
    result
}
