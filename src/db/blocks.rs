/**
 * 文件描述: 区块投影模块，负责把账本区块原子地写入投影
 * 功能概述:
 * - apply_block: 在一个数据库事务内写入区块、交易以及账户/节点/角色
 * - 按高度批量查询区块
 * - 区块游标分页，支持逆序与时间过滤
 *
 * 主要组件:
 * - BlockIndices: 本次写入开始时各实体的当前行数，用于分配递增索引
 * - apply_block_in: 事务内的具体写入逻辑
 */

use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, Transaction as SqlTransaction};
use crate::db::{count_rows, next_cursor, select_by_keys, select_page, PagedTable, ProjectionStore};
use crate::error::IndexerError;
use crate::models::{Block, Command, Entity, Page, PageQuery, Transaction};
use crate::utils::align_by_keys;

const BLOCK_PAGE: PagedTable = PagedTable {
    table: "block",
    columns: "height, payload",
    index_column: "height",
    time_column: Some("created_time"),
};

/// 各实体的下一个可用索引
struct BlockIndices {
    transaction: u64,
    account: u64,
    peer: u64,
    role: u64,
}

impl BlockIndices {
    fn load(tx: &SqlTransaction<'_>) -> Result<Self, IndexerError> {
        Ok(BlockIndices {
            transaction: count_rows(tx, Entity::Transaction)? + 1,
            account: count_rows(tx, Entity::Account)? + 1,
            peer: count_rows(tx, Entity::Peer)? + 1,
            role: count_rows(tx, Entity::Role)? + 1,
        })
    }
}

fn decode_block(payload: &[u8]) -> Result<Block, IndexerError> {
    Ok(serde_json::from_slice(payload)?)
}

fn apply_command(
    tx: &SqlTransaction<'_>,
    indices: &mut BlockIndices,
    command: &Command,
) -> Result<(), IndexerError> {
    match command {
        Command::CreateAccount(create) => {
            tx.execute(
                "INSERT INTO account (\"index\", id, quorum) VALUES (?1, ?2, 1)",
                params![indices.account as i64, create.account_id()],
            )?;
            indices.account += 1;
        }
        Command::SetAccountQuorum(set) => {
            let updated = tx.execute(
                "UPDATE account SET quorum = ?1 WHERE id = ?2",
                params![set.quorum, set.account_id],
            )?;
            if updated == 0 {
                warn!("设置签名阈值的账户不存在: {}", set.account_id);
            }
        }
        Command::AddPeer(add) => {
            tx.execute(
                "INSERT INTO peer (\"index\", address, public_key) VALUES (?1, ?2, ?3)",
                params![indices.peer as i64, add.peer.address, add.peer.peer_key],
            )?;
            indices.peer += 1;
        }
        Command::CreateRole(create) => {
            let permissions = serde_json::to_string(&create.permissions)?;
            tx.execute(
                "INSERT INTO role (\"index\", name, permissions) VALUES (?1, ?2, ?3)",
                params![indices.role as i64, create.role_name, permissions],
            )?;
            indices.role += 1;
        }
        Command::Other(_) => {}
    }
    Ok(())
}

fn insert_transaction(
    tx: &SqlTransaction<'_>,
    indices: &mut BlockIndices,
    block: &Block,
    transaction: &Transaction,
) -> Result<(), IndexerError> {
    let payload = serde_json::to_vec(transaction)?;
    tx.execute(
        "INSERT INTO \"transaction\" (\"index\", payload, hash, creator_domain, block_height, time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            indices.transaction as i64,
            payload,
            transaction.hash()?,
            transaction.creator_domain(),
            block.height() as i64,
            block.payload.created_time,
        ],
    )?;
    indices.transaction += 1;

    for command in transaction.commands() {
        apply_command(tx, indices, command)?;
    }
    Ok(())
}

/// 事务内写入一个区块的全部效果
fn apply_block_in(tx: &SqlTransaction<'_>, block: &Block) -> Result<(), IndexerError> {
    let payload = serde_json::to_vec(block)?;
    tx.execute(
        "INSERT INTO block (height, payload, created_time, transaction_count) VALUES (?1, ?2, ?3, ?4)",
        params![
            block.height() as i64,
            payload,
            block.payload.created_time,
            block.transaction_count() as i64,
        ],
    )?;

    let mut indices = BlockIndices::load(tx)?;
    for transaction in block.transactions() {
        insert_transaction(tx, &mut indices, block, transaction)?;
    }
    Ok(())
}

impl ProjectionStore {
    /// 原子地应用一个区块：要么全部可见，要么全部回滚。
    ///
    /// 索引按"读取当前行数再写入"分配，调用方必须保证不会并发调用。
    pub async fn apply_block(&self, block: Block) -> Result<(), IndexerError> {
        let height = block.height();
        let transaction_count = block.transaction_count();
        self.with_conn("apply_block", move |conn| {
            let tx = conn.transaction()?;
            apply_block_in(&tx, &block)?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        debug!("已应用区块 {}，包含 {} 笔交易", height, transaction_count);
        Ok(())
    }

    /// 按高度批量查询区块，结果与输入位置对齐（含重复）
    pub async fn blocks_by_height(&self, heights: Vec<u64>) -> Result<Vec<Option<Block>>, IndexerError> {
        self.with_conn("blocks_by_height", move |conn| {
            let keys = heights.iter().map(|height| Value::Integer(*height as i64)).collect();
            let rows = select_by_keys(conn, "payload", "block", "height", "height", keys, |row| row.get::<_, Vec<u8>>(0))?;
            let blocks = rows
                .iter()
                .map(|payload| decode_block(payload))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(align_by_keys(&heights, blocks, |block| block.height()))
        })
        .await
    }

    pub async fn block_by_height(&self, height: u64) -> Result<Option<Block>, IndexerError> {
        Ok(self.blocks_by_height(vec![height]).await?.into_iter().next().flatten())
    }

    /// 区块分页，正序与逆序的 next_after 都是 after + 返回行数
    pub async fn block_list(&self, query: PageQuery) -> Result<Page<Block>, IndexerError> {
        self.with_conn("block_list", move |conn| {
            let (after, rows) = select_page(conn, &BLOCK_PAGE, &query, |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let next_after = next_cursor(after, rows.len());
            let items = rows
                .iter()
                .map(|(_, payload)| decode_block(payload))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page { items, next_after })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::REVERSE_CURSOR_START;
    use crate::testing::*;

    #[tokio::test]
    async fn applies_commands_in_order() {
        let store = memory_store().await;
        for block in explorer_blocks() {
            store.apply_block(block).await.unwrap();
        }

        assert_eq!(store.block_count().await.unwrap(), 3);
        assert_eq!(store.transaction_count().await.unwrap(), 4);
        assert_eq!(store.account_count().await.unwrap(), 3);

        let accounts = store
            .accounts_by_id(vec!["alice@explorer".into(), "bob@explorer".into(), "eve@explorer".into()])
            .await
            .unwrap();
        let quorums: Vec<u32> = accounts.into_iter().map(|account| account.unwrap().quorum).collect();
        assert_eq!(quorums, vec![3, 1, 1]);
    }

    #[tokio::test]
    async fn block_hash_survives_storage() {
        let store = memory_store().await;
        let block = explorer_blocks().remove(1);
        let hash = block.hash().unwrap();
        store.apply_block(block).await.unwrap();

        let loaded = store.block_by_height(2).await.unwrap().unwrap();
        assert_eq!(loaded.hash().unwrap(), hash);
        assert_eq!(loaded.transaction_count(), 2);
    }

    #[tokio::test]
    async fn failed_block_leaves_nothing_behind() {
        let store = memory_store().await;
        store
            .apply_block(make_block(1, "2019-01-01T09:00:00Z", vec![transaction(vec![create_account("a@x")])]))
            .await
            .unwrap();

        // 第二笔交易重复创建账户，整个区块必须回滚
        let bad = make_block(
            2,
            "2019-01-01T09:01:00Z",
            vec![
                transaction(vec![add_peer("10.0.0.1:10001", "aa")]),
                transaction(vec![create_account("a@x")]),
            ],
        );
        assert!(matches!(store.apply_block(bad).await, Err(IndexerError::Database(_))));

        assert_eq!(store.block_count().await.unwrap(), 1);
        assert_eq!(store.transaction_count().await.unwrap(), 1);
        assert_eq!(store.peer_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn same_content_gets_new_indices() {
        let store = memory_store().await;
        let tx = transaction(vec![add_peer("10.0.0.1:10001", "aa")]);
        let again = transaction(vec![]);
        store
            .apply_block(make_block(1, "2019-01-01T09:00:00Z", vec![tx.clone(), again.clone()]))
            .await
            .unwrap();
        store
            .apply_block(make_block(2, "2019-01-01T09:01:00Z", vec![again.clone()]))
            .await
            .unwrap();

        assert_eq!(store.transaction_count().await.unwrap(), 3);
        let page = store.transaction_list(PageQuery::first(10)).await.unwrap();
        let indices: Vec<u64> = page.items.iter().map(|record| record.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(page.items[1].hash, page.items[2].hash);
        assert_eq!(page.items[2].block_height, 2);
    }

    #[tokio::test]
    async fn lookups_are_aligned_with_duplicates() {
        let store = memory_store().await;
        for block in explorer_blocks() {
            store.apply_block(block).await.unwrap();
        }
        let blocks = store.blocks_by_height(vec![3, 9, 1, 3]).await.unwrap();
        let heights: Vec<Option<u64>> = blocks.iter().map(|block| block.as_ref().map(Block::height)).collect();
        assert_eq!(heights, vec![Some(3), None, Some(1), Some(3)]);
    }

    #[tokio::test]
    async fn pages_forward_until_empty() {
        let store = memory_store().await;
        for block in explorer_blocks() {
            store.apply_block(block).await.unwrap();
        }

        let mut after = None;
        let mut visited = Vec::new();
        loop {
            let page = store
                .block_list(PageQuery { after, count: 1, ..Default::default() })
                .await
                .unwrap();
            after = Some(page.next_after);
            if page.items.is_empty() {
                break;
            }
            visited.extend(page.items.iter().map(Block::height));
        }
        assert_eq!(visited, vec![1, 2, 3]);
        assert_eq!(after, Some(3));
    }

    #[tokio::test]
    async fn pages_backward_from_tip() {
        let store = memory_store().await;
        for block in explorer_blocks() {
            store.apply_block(block).await.unwrap();
        }

        let first = store
            .block_list(PageQuery { count: 2, reverse: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(first.items.iter().map(Block::height).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(first.next_after, REVERSE_CURSOR_START + 2);

        // 游标同样是 after + 返回行数，从显式高度开始逆序翻页
        let below_tip = store
            .block_list(PageQuery { after: Some(3), count: 2, reverse: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(below_tip.items.iter().map(Block::height).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(below_tip.next_after, 5);

        let empty = store
            .block_list(PageQuery { after: Some(1), count: 2, reverse: true, ..Default::default() })
            .await
            .unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.next_after, 1);
    }

    #[tokio::test]
    async fn cursor_beyond_any_height_is_empty() {
        let store = memory_store().await;
        for block in explorer_blocks() {
            store.apply_block(block).await.unwrap();
        }

        let page = store.block_list(PageQuery::after(u64::MAX, 10)).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_after, u64::MAX);
    }

    #[tokio::test]
    async fn filters_blocks_by_time() {
        let store = memory_store().await;
        for block in explorer_blocks() {
            store.apply_block(block).await.unwrap();
        }
        let query = PageQuery {
            count: 10,
            time_after: Some(crate::utils::millis_to_datetime(millis("2019-01-01T11:57:00Z"))),
            time_before: Some(crate::utils::millis_to_datetime(millis("2019-01-01T11:59:00Z"))),
            ..Default::default()
        };
        let page = store.block_list(query).await.unwrap();
        assert_eq!(page.items.iter().map(Block::height).collect::<Vec<_>>(), vec![2]);
    }
}
