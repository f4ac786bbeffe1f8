/**
 * 文件描述: 账本节点客户端，负责从节点获取区块
 * 功能概述:
 * - 签名并发送查询
 * - scan_blocks: 从指定高度开始逐块追赶，直到链顶
 * - fetch_commit: 订阅新提交的区块，返回可取消的订阅句柄
 *
 * 主要组件:
 * - LedgerTransport trait: 与节点通信的传输层
 * - ChainClient: 查询签名、追赶扫描、提交订阅
 * - CommitSubscription: 订阅句柄，既是完成信号也可主动取消
 */

pub mod transport;

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use sha3::{Digest, Sha3_256};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use crate::error::IndexerError;
use crate::models::{
    Block, BlockQueryResponse, LedgerConfig, QueryKind, QueryMeta, QueryPayload, QueryResponse,
    Signature, SignedQuery,
};

pub use transport::WsTransport;

/// 提交订阅返回的消息流
pub type CommitStream = BoxStream<'static, Result<BlockQueryResponse, IndexerError>>;

/// 与账本节点通信的传输层
#[async_trait]
pub trait LedgerTransport: Send + Sync + 'static {
    /// 一元查询
    async fn find(&self, query: SignedQuery) -> Result<QueryResponse, IndexerError>;

    /// 打开提交订阅，返回时订阅请求已经发出
    async fn fetch_commits(&self, query: SignedQuery) -> Result<CommitStream, IndexerError>;
}

#[async_trait]
impl<T: LedgerTransport + ?Sized> LedgerTransport for Arc<T> {
    async fn find(&self, query: SignedQuery) -> Result<QueryResponse, IndexerError> {
        (**self).find(query).await
    }

    async fn fetch_commits(&self, query: SignedQuery) -> Result<CommitStream, IndexerError> {
        (**self).fetch_commits(query).await
    }
}

/// 解析十六进制 ed25519 私钥种子
pub fn parse_signing_key(private_key: &str) -> Result<SigningKey, IndexerError> {
    let bytes = hex::decode(private_key.trim())
        .map_err(|e| IndexerError::Config(format!("私钥不是合法的十六进制: {}", e)))?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| IndexerError::Config(format!("私钥长度应为32字节，实际为{}字节", bytes.len())))?;
    Ok(SigningKey::from_bytes(&seed))
}

pub struct ChainClient<T> {
    transport: T,
    account_id: String,
    signing_key: SigningKey,
    query_counter: AtomicU64,
}

impl<T: LedgerTransport> ChainClient<T> {
    pub fn new(transport: T, config: &LedgerConfig) -> Result<Self, IndexerError> {
        Ok(ChainClient {
            transport,
            account_id: config.account_id.clone(),
            signing_key: parse_signing_key(&config.private_key)?,
            query_counter: AtomicU64::new(1),
        })
    }

    /// 附加查询元数据并签名
    fn prepare_query(&self, query: QueryKind) -> Result<SignedQuery, IndexerError> {
        let payload = QueryPayload {
            meta: QueryMeta {
                creator_account_id: self.account_id.clone(),
                created_time: Utc::now().timestamp_millis(),
                query_counter: self.query_counter.fetch_add(1, Ordering::Relaxed),
            },
            query,
        };
        let digest = Sha3_256::digest(serde_json::to_vec(&payload)?);
        let signature = self.signing_key.sign(&digest);
        Ok(SignedQuery {
            payload,
            signature: Signature {
                public_key: hex::encode(self.signing_key.verifying_key().to_bytes()),
                signature: hex::encode(signature.to_bytes()),
            },
        })
    }

    /// 获取指定高度的区块；节点的查询错误以 `IndexerError::Node` 返回
    pub async fn get_block(&self, height: u64) -> Result<Block, IndexerError> {
        let query = self.prepare_query(QueryKind::GetBlock { height })?;
        match self.transport.find(query).await? {
            QueryResponse::BlockResponse { block } => Ok(block),
            QueryResponse::ErrorResponse(response) => Err(IndexerError::Node(response)),
        }
    }

    /// 从 `first_height` 开始逐块获取，每块等待 `on_block` 完成后再请求下一块。
    ///
    /// 遇到"高度不存在"时正常结束；`on_block` 返回 `Break` 时提前结束。
    /// 返回本次扫描交给 `on_block` 的区块数。
    pub async fn scan_blocks<F, Fut>(&self, first_height: u64, mut on_block: F) -> Result<u64, IndexerError>
    where
        F: FnMut(Block) -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        let mut height = first_height;
        let mut scanned = 0u64;
        loop {
            let block = match self.get_block(height).await {
                Ok(block) => block,
                Err(IndexerError::Node(ref response)) if response.is_height_not_found() => {
                    debug!("高度 {} 不存在，追赶扫描到达链顶", height);
                    break;
                }
                Err(e) => {
                    warn!("获取高度 {} 的区块失败: {}", height, e);
                    return Err(e);
                }
            };
            scanned += 1;
            if on_block(block).await.is_break() {
                debug!("追赶扫描在高度 {} 后被要求停止", height);
                break;
            }
            height += 1;
        }
        info!("追赶扫描结束: 起始高度 {}, 共 {} 个区块", first_height, scanned);
        Ok(scanned)
    }

    /// 订阅新提交的区块。`on_block` 按到达顺序同步调用。
    ///
    /// 返回的句柄在调用 `end()` 后以 Ok 完成；传输错误、节点报告的区块错误、
    /// 或未经取消的流结束都会以错误完成。
    pub async fn fetch_commit<F>(&self, mut on_block: F) -> Result<CommitSubscription, IndexerError>
    where
        F: FnMut(Block) + Send + 'static,
    {
        let query = self.prepare_query(QueryKind::Blocks)?;
        let mut stream = self.transport.fetch_commits(query).await?;
        info!("已订阅新提交的区块");

        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancelled => {
                        debug!("区块订阅已取消");
                        return Ok(());
                    }
                    message = stream.next() => match message {
                        Some(Ok(BlockQueryResponse::BlockResponse { block })) => {
                            debug!("收到新提交的区块, 高度: {}", block.height());
                            on_block(block);
                        }
                        Some(Ok(BlockQueryResponse::BlockErrorResponse { message })) => {
                            return Err(IndexerError::BlockStream(message));
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            return Err(IndexerError::Ledger("区块订阅流被节点关闭".to_string()));
                        }
                    },
                }
            }
        });

        Ok(CommitSubscription { cancel: Some(cancel), task })
    }
}

/// 提交订阅句柄。await 句柄即等待订阅结束。
pub struct CommitSubscription {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), IndexerError>>,
}

impl CommitSubscription {
    /// 请求取消订阅
    pub fn end(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Future for CommitSubscription {
    type Output = Result<(), IndexerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|joined| joined.map_err(IndexerError::from).and_then(|result| result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use futures::FutureExt;
    use crate::models::{ErrorReason, ErrorResponse, SIGNATORIES_INVALID_MESSAGE};
    use crate::testing::{chain_of, client_for, create_account, make_block, transaction, MemoryLedger};

    async fn scan_to_vec<T: LedgerTransport>(client: &ChainClient<T>, first_height: u64) -> Result<Vec<Block>, IndexerError> {
        let mut blocks = Vec::new();
        client
            .scan_blocks(first_height, |block| {
                blocks.push(block);
                std::future::ready(ControlFlow::Continue(()))
            })
            .await?;
        Ok(blocks)
    }

    #[tokio::test]
    async fn scan_yields_every_block_then_stops() {
        let ledger = Arc::new(MemoryLedger::with_blocks(chain_of(3)));
        let client = client_for(ledger.clone());

        let blocks = scan_to_vec(&client, 1).await.unwrap();
        assert_eq!(blocks.iter().map(Block::height).collect::<Vec<_>>(), vec![1, 2, 3]);

        assert_eq!(scan_to_vec(&client, 2).await.unwrap().len(), 2);
        assert!(scan_to_vec(&client, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_stops_when_callback_breaks() {
        let ledger = Arc::new(MemoryLedger::with_blocks(chain_of(5)));
        let client = client_for(ledger);
        let mut seen = 0;
        let scanned = client
            .scan_blocks(1, |_block| {
                seen += 1;
                let flow = if seen == 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) };
                std::future::ready(flow)
            })
            .await
            .unwrap();
        assert_eq!(scanned, 2);
    }

    #[tokio::test]
    async fn signatory_failure_is_not_end_of_chain() {
        let ledger = Arc::new(MemoryLedger::with_blocks(chain_of(2)));
        ledger.reject_signatures(true);
        let client = client_for(ledger);

        match scan_to_vec(&client, 1).await {
            Err(IndexerError::Node(response)) => {
                assert_eq!(response.message, SIGNATORIES_INVALID_MESSAGE);
                assert!(!response.is_height_not_found());
            }
            other => panic!("expected signatory error, got {:?}", other),
        }
    }

    #[test]
    fn height_not_found_requires_exact_signature() {
        let not_found = ErrorResponse {
            reason: ErrorReason::StatefulInvalid,
            error_code: 3,
            message: "no such height".to_string(),
        };
        assert!(not_found.is_height_not_found());
        assert!(!ErrorResponse { error_code: 2, ..not_found.clone() }.is_height_not_found());
        assert!(!ErrorResponse { reason: ErrorReason::StatelessInvalid, ..not_found.clone() }.is_height_not_found());
    }

    #[tokio::test]
    async fn commit_subscription_delivers_then_cancels() {
        let ledger = Arc::new(MemoryLedger::with_blocks(chain_of(1)));
        let client = client_for(ledger.clone());

        let (sender, mut received) = tokio::sync::mpsc::unbounded_channel();
        let mut subscription = client
            .fetch_commit(move |block| {
                let _ = sender.send(block);
            })
            .await
            .unwrap();

        assert!((&mut subscription).now_or_never().is_none());

        let block = make_block(2, "2019-01-01T10:00:00Z", vec![transaction(vec![create_account("bob@explorer")])]);
        ledger.commit(block.clone());
        let delivered = tokio::time::timeout(Duration::from_secs(1), received.recv()).await.unwrap();
        assert_eq!(delivered, Some(block));

        subscription.end();
        tokio::time::timeout(Duration::from_secs(1), subscription).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn block_error_rejects_subscription() {
        let ledger = Arc::new(MemoryLedger::new());
        let client = client_for(ledger.clone());
        let subscription = client.fetch_commit(|_block| {}).await.unwrap();

        ledger.fail_commits("block store unavailable");
        match tokio::time::timeout(Duration::from_secs(1), subscription).await.unwrap() {
            Err(IndexerError::BlockStream(message)) => assert_eq!(message, "block store unavailable"),
            other => panic!("expected block stream error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_private_key() {
        assert!(matches!(parse_signing_key("zz"), Err(IndexerError::Config(_))));
        assert!(matches!(parse_signing_key("abcd"), Err(IndexerError::Config(_))));
        assert!(parse_signing_key(&"11".repeat(32)).is_ok());
    }
}
