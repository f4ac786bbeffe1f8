//! 测试用的内存账本与区块构造函数

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use tokio::sync::broadcast;
use crate::blockchain::{ChainClient, CommitStream, LedgerTransport};
use crate::db::ProjectionStore;
use crate::error::IndexerError;
use crate::models::*;

pub const TEST_ACCOUNT: &str = "admin@test";

pub fn test_ledger_config() -> LedgerConfig {
    LedgerConfig {
        url: "ws://127.0.0.1:0".to_string(),
        account_id: TEST_ACCOUNT.to_string(),
        private_key: "11".repeat(32),
    }
}

pub fn client_for(ledger: Arc<MemoryLedger>) -> ChainClient<Arc<MemoryLedger>> {
    ChainClient::new(ledger, &test_ledger_config()).unwrap()
}

/// 内存账本：按高度应答 get_block，并通过广播推送新提交的区块
pub struct MemoryLedger {
    blocks: Mutex<Vec<Block>>,
    commits: broadcast::Sender<BlockQueryResponse>,
    reject_signatures: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_blocks(Vec::new())
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        let (commits, _) = broadcast::channel(64);
        MemoryLedger {
            blocks: Mutex::new(blocks),
            commits,
            reject_signatures: AtomicBool::new(false),
        }
    }

    pub fn reject_signatures(&self, reject: bool) {
        self.reject_signatures.store(reject, Ordering::SeqCst);
    }

    /// 追加一个区块并推送给订阅者
    pub fn commit(&self, block: Block) {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).push(block.clone());
        let _ = self.commits.send(BlockQueryResponse::BlockResponse { block });
    }

    pub fn fail_commits(&self, message: &str) {
        let _ = self.commits.send(BlockQueryResponse::BlockErrorResponse { message: message.to_string() });
    }

    /// 当前打开的订阅数
    pub fn subscribers(&self) -> usize {
        self.commits.receiver_count()
    }

    pub fn height(&self) -> u64 {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).len() as u64
    }
}

#[async_trait]
impl LedgerTransport for MemoryLedger {
    async fn find(&self, query: SignedQuery) -> Result<QueryResponse, IndexerError> {
        if self.reject_signatures.load(Ordering::SeqCst) {
            return Ok(QueryResponse::ErrorResponse(ErrorResponse {
                reason: ErrorReason::StatefulInvalid,
                error_code: NO_BLOCK_ERROR_CODE,
                message: SIGNATORIES_INVALID_MESSAGE.to_string(),
            }));
        }
        let height = match query.payload.query {
            QueryKind::GetBlock { height } => height,
            QueryKind::Blocks => {
                return Ok(QueryResponse::ErrorResponse(ErrorResponse {
                    reason: ErrorReason::NotSupported,
                    error_code: 1,
                    message: "blocks query is a subscription".to_string(),
                }))
            }
        };
        let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        match blocks.iter().find(|block| block.height() == height) {
            Some(block) => Ok(QueryResponse::BlockResponse { block: block.clone() }),
            None => Ok(QueryResponse::ErrorResponse(ErrorResponse {
                reason: ErrorReason::StatefulInvalid,
                error_code: NO_BLOCK_ERROR_CODE,
                message: format!("requested height ({}) is greater than the ledger's one", height),
            })),
        }
    }

    async fn fetch_commits(&self, _query: SignedQuery) -> Result<CommitStream, IndexerError> {
        let receiver = self.commits.subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(message) => Some((Ok(message), receiver)),
                Err(broadcast::error::RecvError::Closed) => None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => Some((
                    Err(IndexerError::Ledger(format!("订阅落后，丢失 {} 条消息", skipped))),
                    receiver,
                )),
            }
        });
        Ok(stream.boxed())
    }
}

pub fn millis(time: &str) -> i64 {
    DateTime::parse_from_rfc3339(time).unwrap().timestamp_millis()
}

pub fn make_block(height: u64, created_time: &str, transactions: Vec<Transaction>) -> Block {
    Block {
        payload: BlockPayload {
            height,
            prev_block_hash: String::new(),
            created_time: millis(created_time),
            transactions,
        },
        signatures: Vec::new(),
    }
}

pub fn transaction(commands: Vec<Command>) -> Transaction {
    transaction_by(TEST_ACCOUNT, commands)
}

pub fn transaction_by(creator: &str, commands: Vec<Command>) -> Transaction {
    Transaction {
        payload: TransactionPayload {
            reduced_payload: ReducedPayload {
                creator_account_id: creator.to_string(),
                created_time: 0,
                quorum: 1,
                commands,
            },
        },
        signatures: Vec::new(),
    }
}

pub fn create_account(id: &str) -> Command {
    let (name, domain) = id.split_once('@').unwrap();
    Command::CreateAccount(CreateAccount {
        account_name: name.to_string(),
        domain_id: domain.to_string(),
        public_key: String::new(),
    })
}

pub fn set_account_quorum(account_id: &str, quorum: u32) -> Command {
    Command::SetAccountQuorum(SetAccountQuorum { account_id: account_id.to_string(), quorum })
}

pub fn add_peer(address: &str, peer_key: &str) -> Command {
    Command::AddPeer(AddPeer {
        peer: PeerInfo { address: address.to_string(), peer_key: peer_key.to_string() },
    })
}

pub fn create_role(name: &str, permissions: Vec<i32>) -> Command {
    Command::CreateRole(CreateRole { role_name: name.to_string(), permissions })
}

/// 高度 1..=n 的链，每块一笔创建账户的交易
pub fn chain_of(n: u64) -> Vec<Block> {
    (1..=n)
        .map(|height| {
            make_block(
                height,
                "2019-01-01T09:00:00Z",
                vec![transaction(vec![create_account(&format!("user{}@chain", height))])],
            )
        })
        .collect()
}

/// 已初始化的内存投影库
pub async fn memory_store() -> ProjectionStore {
    let store = ProjectionStore::open(":memory:").unwrap();
    store.init().await.unwrap();
    store
}

/// alice 在 09:00 创建；bob 在 11:57 创建并把 alice 的阈值设为 3；eve 在 11:59 创建
pub fn explorer_blocks() -> Vec<Block> {
    vec![
        make_block(
            1,
            "2019-01-01T09:00:00Z",
            vec![transaction_by("alice@explorer", vec![create_account("alice@explorer")])],
        ),
        make_block(
            2,
            "2019-01-01T11:57:00Z",
            vec![
                transaction_by("bob@explorer", vec![create_account("bob@explorer")]),
                transaction_by("bob@explorer", vec![set_account_quorum("alice@explorer", 3)]),
            ],
        ),
        make_block(
            3,
            "2019-01-01T11:59:00Z",
            vec![transaction_by("eve@explorer", vec![create_account("eve@explorer")])],
        ),
    ]
}
