use rusqlite::types::Value;
use rusqlite::Row;
use crate::db::{next_cursor, select_by_keys, select_page, PagedTable, ProjectionStore};
use crate::error::IndexerError;
use crate::models::{DomainCount, Page, PageQuery, TransactionRecord};
use crate::utils::{align_by_keys, millis_to_datetime};

const TRANSACTION_COLUMNS: &str = "\"index\", payload, hash, creator_domain, block_height, time";

const TRANSACTION_PAGE: PagedTable = PagedTable {
    table: "\"transaction\"",
    columns: TRANSACTION_COLUMNS,
    index_column: "\"index\"",
    time_column: Some("time"),
};

/// 交易行的原始列，载荷在连接锁外解码
struct TransactionRow {
    index: i64,
    payload: Vec<u8>,
    hash: String,
    creator_domain: String,
    block_height: i64,
    time: i64,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TransactionRow {
            index: row.get(0)?,
            payload: row.get(1)?,
            hash: row.get(2)?,
            creator_domain: row.get(3)?,
            block_height: row.get(4)?,
            time: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<TransactionRecord, IndexerError> {
        Ok(TransactionRecord {
            index: self.index as u64,
            hash: self.hash,
            transaction: serde_json::from_slice(&self.payload)?,
            creator_domain: self.creator_domain,
            block_height: self.block_height as u64,
            time: millis_to_datetime(self.time),
        })
    }
}

fn into_records(rows: Vec<TransactionRow>) -> Result<Vec<TransactionRecord>, IndexerError> {
    rows.into_iter().map(TransactionRow::into_record).collect()
}

impl ProjectionStore {
    /// 按哈希批量查询交易，结果与输入位置对齐。
    ///
    /// 相同内容的交易可以被多次写入，同一哈希命中多行时返回索引最小的一行。
    pub async fn transactions_by_hash(
        &self,
        hashes: Vec<String>,
    ) -> Result<Vec<Option<TransactionRecord>>, IndexerError> {
        self.with_conn("transactions_by_hash", move |conn| {
            let keys = hashes.iter().map(|hash| Value::Text(hash.clone())).collect();
            let rows = select_by_keys(
                conn,
                TRANSACTION_COLUMNS,
                "\"transaction\"",
                "hash",
                "\"index\"",
                keys,
                TransactionRow::from_row,
            )?;
            let records = into_records(rows)?;
            Ok(align_by_keys(&hashes, records, |record| record.hash.clone()))
        })
        .await
    }

    pub async fn transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRecord>, IndexerError> {
        Ok(self
            .transactions_by_hash(vec![hash.to_string()])
            .await?
            .into_iter()
            .next()
            .flatten())
    }

    /// 交易分页，按投影索引正序
    pub async fn transaction_list(&self, query: PageQuery) -> Result<Page<TransactionRecord>, IndexerError> {
        let query = PageQuery { reverse: false, ..query };
        self.with_conn("transaction_list", move |conn| {
            let (after, rows) = select_page(conn, &TRANSACTION_PAGE, &query, TransactionRow::from_row)?;
            let next_after = next_cursor(after, rows.len());
            Ok(Page { items: into_records(rows)?, next_after })
        })
        .await
    }

    /// 按创建者所在域统计交易数，按域名排序
    pub async fn transaction_count_per_domain(&self) -> Result<Vec<DomainCount>, IndexerError> {
        self.with_conn("transaction_count_per_domain", |conn| {
            let mut stmt = conn.prepare(
                "SELECT creator_domain, COUNT(1) FROM \"transaction\" \
                 GROUP BY creator_domain ORDER BY creator_domain",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(DomainCount {
                    domain: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
