/**
 * 文件描述: 账户投影查询
 * 功能概述:
 * - 按账户ID批量查询账户及其签名阈值
 * - 账户游标分页
 *
 * 账户由创建账户命令写入，之后只有签名阈值会被更新，从不删除。
 */

use rusqlite::types::Value;
use rusqlite::Row;
use crate::db::{next_cursor, select_by_keys, select_page, PagedTable, ProjectionStore};
use crate::error::IndexerError;
use crate::models::{Account, Page, PageQuery};
use crate::utils::align_by_keys;

const ACCOUNT_PAGE: PagedTable = PagedTable {
    table: "account",
    columns: "id, quorum",
    index_column: "\"index\"",
    time_column: None,
};

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account { id: row.get(0)?, quorum: row.get(1)? })
}

impl ProjectionStore {
    /// 按账户ID批量查询，结果与输入位置对齐（含重复）
    pub async fn accounts_by_id(&self, ids: Vec<String>) -> Result<Vec<Option<Account>>, IndexerError> {
        self.with_conn("accounts_by_id", move |conn| {
            let keys = ids.iter().map(|id| Value::Text(id.clone())).collect();
            let accounts = select_by_keys(conn, "id, quorum", "account", "id", "\"index\"", keys, account_from_row)?;
            Ok(align_by_keys(&ids, accounts, |account| account.id.clone()))
        })
        .await
    }

    pub async fn account_list(&self, query: PageQuery) -> Result<Page<Account>, IndexerError> {
        let query = PageQuery { reverse: false, time_after: None, time_before: None, ..query };
        self.with_conn("account_list", move |conn| {
            let (after, items) = select_page(conn, &ACCOUNT_PAGE, &query, account_from_row)?;
            let next_after = next_cursor(after, items.len());
            Ok(Page { items, next_after })
        })
        .await
    }
}
