use rusqlite::types::Value;
use rusqlite::Row;
use crate::db::{next_cursor, select_by_keys, select_page, PagedTable, ProjectionStore};
use crate::error::IndexerError;
use crate::models::{Page, PageQuery, Peer};
use crate::utils::align_by_keys;

const PEER_PAGE: PagedTable = PagedTable {
    table: "peer",
    columns: "address, public_key",
    index_column: "\"index\"",
    time_column: None,
};

fn peer_from_row(row: &Row<'_>) -> rusqlite::Result<Peer> {
    Ok(Peer { address: row.get(0)?, public_key: row.get(1)? })
}

impl ProjectionStore {
    /// 按公钥批量查询节点
    pub async fn peers_by_public_key(&self, public_keys: Vec<String>) -> Result<Vec<Option<Peer>>, IndexerError> {
        self.with_conn("peers_by_public_key", move |conn| {
            let keys = public_keys.iter().map(|key| Value::Text(key.clone())).collect();
            let peers = select_by_keys(conn, "address, public_key", "peer", "public_key", "\"index\"", keys, peer_from_row)?;
            Ok(align_by_keys(&public_keys, peers, |peer| peer.public_key.clone()))
        })
        .await
    }

    pub async fn peer_list(&self, query: PageQuery) -> Result<Page<Peer>, IndexerError> {
        let query = PageQuery { reverse: false, time_after: None, time_before: None, ..query };
        self.with_conn("peer_list", move |conn| {
            let (after, items) = select_page(conn, &PEER_PAGE, &query, peer_from_row)?;
            let next_after = next_cursor(after, items.len());
            Ok(Page { items, next_after })
        })
        .await
    }
}
