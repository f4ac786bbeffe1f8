use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::IndexerError;
use crate::utils::{account_domain, millis_to_datetime, sha3_hex};

// 常量定义
/// 逆序分页时 `after` 的默认值
pub const REVERSE_CURSOR_START: u64 = 0x7FFF_FFFF;
/// 高度不存在时节点返回的错误码
pub const NO_BLOCK_ERROR_CODE: u32 = 3;
/// 与高度不存在共用错误码、但表示签名校验失败的消息
pub const SIGNATORIES_INVALID_MESSAGE: &str = "query signatories did not pass validation";

// ---------------------------------------------------------------------------
// 账本区块与交易
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub height: u64,
    #[serde(default)]
    pub prev_block_hash: String,
    /// 出块时间，毫秒时间戳
    pub created_time: i64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub payload: BlockPayload,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.payload.height
    }

    /// 区块哈希：区块载荷规范序列化后的 SHA3-256
    pub fn hash(&self) -> Result<String, IndexerError> {
        sha3_hex(&self.payload)
    }

    pub fn previous_hash(&self) -> &str {
        &self.payload.prev_block_hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.payload.transactions
    }

    pub fn transaction_count(&self) -> usize {
        self.payload.transactions.len()
    }

    pub fn time(&self) -> DateTime<Utc> {
        millis_to_datetime(self.payload.created_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedPayload {
    #[serde(default)]
    pub creator_account_id: String,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default)]
    pub quorum: u32,
    #[serde(default)]
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub reduced_payload: ReducedPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: TransactionPayload,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Transaction {
    /// 交易哈希：交易载荷规范序列化后的 SHA3-256
    pub fn hash(&self) -> Result<String, IndexerError> {
        sha3_hex(&self.payload)
    }

    pub fn creator_account_id(&self) -> &str {
        &self.payload.reduced_payload.creator_account_id
    }

    pub fn creator_domain(&self) -> &str {
        account_domain(self.creator_account_id())
    }

    pub fn commands(&self) -> &[Command] {
        &self.payload.reduced_payload.commands
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAccount {
    pub account_name: String,
    pub domain_id: String,
    #[serde(default)]
    pub public_key: String,
}

impl CreateAccount {
    pub fn account_id(&self) -> String {
        format!("{}@{}", self.account_name, self.domain_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAccountQuorum {
    pub account_id: String,
    pub quorum: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: String,
    pub peer_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPeer {
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRole {
    pub role_name: String,
    #[serde(default)]
    pub permissions: Vec<i32>,
}

/// 交易中的命令。只投影四种命令，其余命令原样保留、应用时跳过。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    CreateAccount(CreateAccount),
    SetAccountQuorum(SetAccountQuorum),
    AddPeer(AddPeer),
    CreateRole(CreateRole),
    #[serde(untagged)]
    Other(serde_json::Value),
}

// ---------------------------------------------------------------------------
// 查询协议
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMeta {
    pub creator_account_id: String,
    pub created_time: i64,
    pub query_counter: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    GetBlock { height: u64 },
    /// 订阅新提交的区块
    Blocks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub meta: QueryMeta,
    pub query: QueryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedQuery {
    pub payload: QueryPayload,
    pub signature: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    StatelessInvalid,
    StatefulInvalid,
    NoAccount,
    NoAccountAssets,
    NoAccountDetail,
    NoSignatories,
    NotSupported,
    NoAsset,
    NoRoles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub reason: ErrorReason,
    pub error_code: u32,
    #[serde(default)]
    pub message: String,
}

impl ErrorResponse {
    /// 判断是否为"高度不存在"。
    ///
    /// 签名校验失败与高度不存在使用相同的原因和错误码，只能靠消息区分。
    pub fn is_height_not_found(&self) -> bool {
        self.reason == ErrorReason::StatefulInvalid
            && self.error_code == NO_BLOCK_ERROR_CODE
            && self.message != SIGNATORIES_INVALID_MESSAGE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResponse {
    BlockResponse { block: Block },
    ErrorResponse(ErrorResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockQueryResponse {
    BlockResponse { block: Block },
    BlockErrorResponse { message: String },
}

// ---------------------------------------------------------------------------
// 投影查询结果
// ---------------------------------------------------------------------------

/// 已投影的交易
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub index: u64,
    pub hash: String,
    pub transaction: Transaction,
    pub creator_domain: String,
    pub block_height: u64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub quorum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub address: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: u64,
}

/// 游标分页参数
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub after: Option<u64>,
    pub count: u32,
    pub time_after: Option<DateTime<Utc>>,
    pub time_before: Option<DateTime<Utc>>,
    /// 仅区块列表支持逆序
    pub reverse: bool,
}

impl PageQuery {
    pub fn first(count: u32) -> Self {
        PageQuery { count, ..Default::default() }
    }

    pub fn after(after: u64, count: u32) -> Self {
        PageQuery { after: Some(after), count, ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_after: u64,
}

/// 可计数的投影实体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Block,
    Transaction,
    Account,
    Peer,
    Role,
}

impl Entity {
    pub fn table(&self) -> &'static str {
        match self {
            Entity::Block => "block",
            Entity::Transaction => "\"transaction\"",
            Entity::Account => "account",
            Entity::Peer => "peer",
            Entity::Role => "role",
        }
    }
}

/// 时间桶统计的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketSource {
    /// 每个桶内的区块数
    Blocks,
    /// 每个桶内区块的交易数之和
    Transactions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Minute,
    Hour,
}

impl TimeUnit {
    pub fn millis(&self) -> i64 {
        match self {
            TimeUnit::Minute => 60_000,
            TimeUnit::Hour => 3_600_000,
        }
    }
}

// ---------------------------------------------------------------------------
// 配置
// ---------------------------------------------------------------------------

// 日志配置结构体
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,            // 日志级别: error, warn, info, debug, trace
    pub file: String,             // 日志文件路径
    pub console_level: String,    // 控制台日志级别
    pub file_enabled: bool,       // 是否启用文件日志
    pub max_size: u64,            // 日志文件最大大小(MB)
    pub max_files: u32,           // 保留的历史日志文件数量
}

// 账本节点配置结构体
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub url: String,              // 节点地址，例如 ws://localhost:50052
    pub account_id: String,       // 查询使用的账户，例如 admin@test
    pub private_key: String,      // 账户私钥（十六进制 ed25519 种子）
}

// 配置结构体
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_path: String,
    pub ledger: LedgerConfig,
    pub disable_sync: Option<bool>,
    pub log: Option<LogConfig>,
}

// 命令行参数结构体
#[derive(Debug, Clone, Default)]
pub struct AppArgs {
    pub reset: bool,
}
