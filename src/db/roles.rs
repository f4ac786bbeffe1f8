use rusqlite::types::Value;
use rusqlite::Row;
use crate::db::{next_cursor, select_by_keys, select_page, PagedTable, ProjectionStore};
use crate::error::IndexerError;
use crate::models::{Page, PageQuery, Role};
use crate::utils::align_by_keys;

const ROLE_PAGE: PagedTable = PagedTable {
    table: "role",
    columns: "name, permissions",
    index_column: "\"index\"",
    time_column: None,
};

// 权限列表以 JSON 数组文本存储
fn role_row(row: &Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn into_roles(rows: Vec<(String, String)>) -> Result<Vec<Role>, IndexerError> {
    rows.into_iter()
        .map(|(name, permissions)| {
            Ok(Role { name, permissions: serde_json::from_str(&permissions)? })
        })
        .collect()
}

impl ProjectionStore {
    /// 按角色名批量查询角色
    pub async fn roles_by_name(&self, names: Vec<String>) -> Result<Vec<Option<Role>>, IndexerError> {
        self.with_conn("roles_by_name", move |conn| {
            let keys = names.iter().map(|name| Value::Text(name.clone())).collect();
            let rows = select_by_keys(conn, "name, permissions", "role", "name", "\"index\"", keys, role_row)?;
            Ok(align_by_keys(&names, into_roles(rows)?, |role| role.name.clone()))
        })
        .await
    }

    pub async fn role_list(&self, query: PageQuery) -> Result<Page<Role>, IndexerError> {
        let query = PageQuery { reverse: false, time_after: None, time_before: None, ..query };
        self.with_conn("role_list", move |conn| {
            let (after, rows) = select_page(conn, &ROLE_PAGE, &query, role_row)?;
            let next_after = next_cursor(after, rows.len());
            Ok(Page { items: into_roles(rows)?, next_after })
        })
        .await
    }
}
