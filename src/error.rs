/**
 * 文件描述: 错误处理模块，定义索引器统一错误类型
 * 功能概述:
 * - 定义账本、存储、配置等各类错误
 * - 区分节点返回的结构化查询错误与传输错误
 * - 提供第三方库错误到索引器错误的转换
 *
 * 主要组件:
 * - IndexerError枚举: 索引器所有可能的错误
 * - fmt::Display实现: 错误消息格式化
 * - From实现: rusqlite / serde_json / websocket / config 错误转换
 */

use std::fmt;
use crate::models::ErrorResponse;

/// 索引器统一错误类型
///
/// 需要 `Clone`：一次批量查询失败时，同一个错误要分发给批次里的所有等待者。
#[derive(Debug, Clone)]
pub enum IndexerError {
    /// 与账本节点通信失败（连接、协议、编码）
    Ledger(String),
    /// 节点返回的结构化查询错误
    Node(ErrorResponse),
    /// 提交订阅中节点报告的区块级错误
    BlockStream(String),
    /// 数据库操作错误
    Database(String),
    /// 序列化/反序列化错误
    Serialization(String),
    /// 配置错误
    Config(String),
    /// 内部错误
    Internal(String),
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IndexerError::Ledger(msg) => write!(f, "账本通信错误: {}", msg),
            IndexerError::Node(response) => write!(
                f,
                "节点查询错误: {} (原因: {:?}, 错误码: {})",
                response.message, response.reason, response.error_code
            ),
            IndexerError::BlockStream(msg) => write!(f, "区块订阅错误: {}", msg),
            IndexerError::Database(msg) => write!(f, "数据库错误: {}", msg),
            IndexerError::Serialization(msg) => write!(f, "序列化错误: {}", msg),
            IndexerError::Config(msg) => write!(f, "配置错误: {}", msg),
            IndexerError::Internal(msg) => write!(f, "内部错误: {}", msg),
        }
    }
}

impl std::error::Error for IndexerError {}

impl From<rusqlite::Error> for IndexerError {
    fn from(err: rusqlite::Error) -> Self {
        IndexerError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for IndexerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        IndexerError::Ledger(err.to_string())
    }
}

impl From<config::ConfigError> for IndexerError {
    fn from(err: config::ConfigError) -> Self {
        IndexerError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexerError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexerError::Internal(format!("后台任务异常退出: {}", err))
    }
}
