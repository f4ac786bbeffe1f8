use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use crate::error::IndexerError;
use crate::models::{Entity, PageQuery, REVERSE_CURSOR_START};

pub mod blocks;
pub mod transactions;
pub mod accounts;
pub mod peers;
pub mod roles;
pub mod stats;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS block (
    height INTEGER PRIMARY KEY,
    payload BLOB NOT NULL,
    created_time INTEGER NOT NULL,
    transaction_count INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS block_created_time ON block (created_time);

CREATE TABLE IF NOT EXISTS "transaction" (
    "index" INTEGER PRIMARY KEY,
    payload BLOB NOT NULL,
    hash TEXT NOT NULL,
    creator_domain TEXT NOT NULL,
    block_height INTEGER NOT NULL REFERENCES block (height),
    time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS transaction_hash ON "transaction" (hash);
CREATE INDEX IF NOT EXISTS transaction_time ON "transaction" (time);

CREATE TABLE IF NOT EXISTS account (
    "index" INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    quorum INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS peer (
    "index" INTEGER PRIMARY KEY,
    address TEXT NOT NULL,
    public_key TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS role (
    "index" INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    permissions TEXT NOT NULL
);
"#;

const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS role;
DROP TABLE IF EXISTS peer;
DROP TABLE IF EXISTS account;
DROP TABLE IF EXISTS "transaction";
DROP TABLE IF EXISTS block;
"#;

/// 超过该耗时的数据库操作会被记录
const SLOW_OPERATION_MS: u128 = 500;

/// 账本的关系型投影，独占所有持久化状态
#[derive(Clone)]
pub struct ProjectionStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectionStore {
    /// 打开数据库；`:memory:` 打开内存数据库
    pub fn open(database_path: &str) -> Result<Self, IndexerError> {
        info!("打开投影数据库: {}", database_path);
        let conn = if database_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open_with_flags(
                database_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(ProjectionStore { conn: Arc::new(Mutex::new(conn)) })
    }

    /// 创建表结构（幂等）
    pub async fn init(&self) -> Result<(), IndexerError> {
        self.with_conn("init", |conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        info!("投影表结构已就绪");
        Ok(())
    }

    /// 删除全部投影数据并重建表结构
    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.with_conn("reset", |conn| {
            conn.execute_batch(DROP_SCHEMA)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        info!("投影数据已清空");
        Ok(())
    }

    /// 在阻塞线程池上使用连接执行操作，记录慢操作
    pub(crate) async fn with_conn<F, T>(&self, operation_name: &'static str, func: F) -> Result<T, IndexerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, IndexerError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            func(&mut guard)
        })
        .await?;

        let duration = start.elapsed();
        if duration.as_millis() > SLOW_OPERATION_MS {
            info!("数据库操作 [{}] 耗时: {:?}", operation_name, duration);
        }
        result
    }

    /// 实体表的精确行数
    pub async fn count(&self, entity: Entity) -> Result<u64, IndexerError> {
        self.with_conn("count", move |conn| count_rows(conn, entity)).await
    }

    pub async fn block_count(&self) -> Result<u64, IndexerError> {
        self.count(Entity::Block).await
    }

    pub async fn transaction_count(&self) -> Result<u64, IndexerError> {
        self.count(Entity::Transaction).await
    }

    pub async fn account_count(&self) -> Result<u64, IndexerError> {
        self.count(Entity::Account).await
    }

    pub async fn peer_count(&self) -> Result<u64, IndexerError> {
        self.count(Entity::Peer).await
    }

    pub async fn role_count(&self) -> Result<u64, IndexerError> {
        self.count(Entity::Role).await
    }
}

pub(crate) fn count_rows(conn: &Connection, entity: Entity) -> Result<u64, IndexerError> {
    let sql = format!("SELECT COUNT(1) FROM {}", entity.table());
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as u64)
}

/// `?, ?, ?` 占位符
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// 按键批量查询：`SELECT <columns> FROM <table> WHERE <key_column> IN (...)`，按 `order_column` 升序
pub(crate) fn select_by_keys<T, F>(
    conn: &Connection,
    columns: &str,
    table: &str,
    key_column: &str,
    order_column: &str,
    keys: Vec<Value>,
    map_row: F,
) -> Result<Vec<T>, IndexerError>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        columns,
        table,
        key_column,
        placeholders(keys.len()),
        order_column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(keys.iter()), map_row)?;
    let items = rows.collect::<rusqlite::Result<Vec<T>>>()?;
    debug!("批量查询 {} 命中 {} 行", table, items.len());
    Ok(items)
}

/// 游标分页的表与列
pub(crate) struct PagedTable {
    pub table: &'static str,
    pub columns: &'static str,
    pub index_column: &'static str,
    pub time_column: Option<&'static str>,
}

/// 游标分页查询。
///
/// 正序选取索引严格大于 `after` 的行，逆序选取严格小于 `after` 的行；
/// 时间过滤 `time_after` 含端点，`time_before` 不含端点。
/// 返回 (after, 行)。
pub(crate) fn select_page<T, F>(
    conn: &Connection,
    paged: &PagedTable,
    query: &PageQuery,
    map_row: F,
) -> Result<(u64, Vec<T>), IndexerError>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let after = query
        .after
        .unwrap_or(if query.reverse { REVERSE_CURSOR_START } else { 0 });

    let mut clauses = vec![format!(
        "{} {} ?",
        paged.index_column,
        if query.reverse { "<" } else { ">" }
    )];
    // 超出 i64 的游标按最大值处理，避免回绕成负数
    let mut values = vec![Value::Integer(i64::try_from(after).unwrap_or(i64::MAX))];
    if let Some(time_column) = paged.time_column {
        if let Some(time_after) = query.time_after {
            clauses.push(format!("{} >= ?", time_column));
            values.push(Value::Integer(time_after.timestamp_millis()));
        }
        if let Some(time_before) = query.time_before {
            clauses.push(format!("{} < ?", time_column));
            values.push(Value::Integer(time_before.timestamp_millis()));
        }
    }
    values.push(Value::Integer(query.count as i64));

    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} {} LIMIT ?",
        paged.columns,
        paged.table,
        clauses.join(" AND "),
        paged.index_column,
        if query.reverse { "DESC" } else { "ASC" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map_row)?;
    let items = rows.collect::<rusqlite::Result<Vec<T>>>()?;
    Ok((after, items))
}

/// 分页的下一游标：after + 返回行数，正序逆序相同。
///
/// 依赖索引稠密且只追加，出现空洞时游标会与实际行位置错开。
pub(crate) fn next_cursor(after: u64, returned: usize) -> u64 {
    after.saturating_add(returned as u64)
}
