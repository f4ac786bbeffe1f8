use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use crate::blockchain::{CommitStream, LedgerTransport};
use crate::error::IndexerError;
use crate::models::{BlockQueryResponse, QueryResponse, SignedQuery};

/// 请求消息
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: u64,
    method: &'static str,
    params: &'a SignedQuery,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// 响应消息；订阅推送的每条消息也使用同一结构
#[derive(Debug, Deserialize)]
struct RpcReply<R> {
    #[allow(dead_code)]
    id: Option<u64>,
    result: Option<R>,
    error: Option<RpcError>,
}

impl<R> RpcReply<R> {
    fn into_result(self) -> Result<R, IndexerError> {
        if let Some(e) = self.error {
            return Err(IndexerError::Ledger(format!("节点返回错误 {}: {}", e.code, e.message)));
        }
        self.result
            .ok_or_else(|| IndexerError::Ledger("节点响应缺少 result 字段".to_string()))
    }
}

fn decode_reply<R: DeserializeOwned>(bytes: &[u8]) -> Result<R, IndexerError> {
    serde_json::from_slice::<RpcReply<R>>(bytes)?.into_result()
}

/// 订阅流中的单条消息；控制帧被跳过
fn decode_commit(
    message: Result<Message, tungstenite::Error>,
) -> Option<Result<BlockQueryResponse, IndexerError>> {
    match message {
        Ok(Message::Text(text)) => Some(decode_reply(text.as_bytes())),
        Ok(Message::Binary(bytes)) => Some(decode_reply(&bytes)),
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

/// 通过 WebSocket 与节点网关通信的传输层。
///
/// 每个一元查询单独建立连接；每个订阅占用一条长连接。
pub struct WsTransport {
    url: String,
    request_id: AtomicU64,
}

impl WsTransport {
    pub fn new(url: &str) -> Self {
        WsTransport {
            url: url.to_string(),
            request_id: AtomicU64::new(1),
        }
    }

    fn request(&self, method: &'static str, query: &SignedQuery) -> Result<String, IndexerError> {
        let request = RpcRequest {
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: query,
        };
        Ok(serde_json::to_string(&request)?)
    }
}

#[async_trait]
impl LedgerTransport for WsTransport {
    async fn find(&self, query: SignedQuery) -> Result<QueryResponse, IndexerError> {
        let request = self.request("find", &query)?;
        let (mut socket, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            error!("连接节点失败: {} - 错误: {}", self.url, e);
            IndexerError::from(e)
        })?;
        socket.send(Message::Text(request)).await?;

        while let Some(message) = socket.next().await {
            let reply = match message? {
                Message::Text(text) => decode_reply(text.as_bytes()),
                Message::Binary(bytes) => decode_reply(&bytes),
                Message::Close(_) => break,
                _ => continue,
            };
            // 响应已经拿到，关闭失败不影响结果
            let _ = socket.close(None).await;
            return reply;
        }
        Err(IndexerError::Ledger("节点在响应前关闭了连接".to_string()))
    }

    async fn fetch_commits(&self, query: SignedQuery) -> Result<CommitStream, IndexerError> {
        let request = self.request("fetch_commits", &query)?;
        let (mut socket, _) = connect_async(self.url.as_str()).await?;
        socket.send(Message::Text(request)).await?;
        debug!("已向 {} 发送订阅请求", self.url);

        let stream = socket.filter_map(|message| futures::future::ready(decode_commit(message)));
        Ok(stream.boxed())
    }
}
