/**
 * 文件描述: 统计模块，按分钟或小时统计区块数与交易数
 * 功能概述:
 * - 以当前时间截断到单位为终点，生成 count 个连续时间桶
 * - 用递归 CTE 生成完整的桶序列再左连接区块表，空桶为 0
 * - 结果从最早的桶开始排列
 *
 * 时间截断向下取整，与 utils::truncate_millis 一致，1970 年以前的区块也落在正确的桶里。
 */

use chrono::{DateTime, Utc};
use rusqlite::params;
use crate::db::ProjectionStore;
use crate::error::IndexerError;
use crate::models::{BucketSource, TimeUnit};
use crate::utils::truncate_millis;

fn bucket_sql(source: BucketSource) -> String {
    let aggregate = match source {
        BucketSource::Blocks => "COUNT(block.height)",
        BucketSource::Transactions => "SUM(block.transaction_count)",
    };
    format!(
        "WITH RECURSIVE bucket(n, start) AS ( \
             SELECT 0, ?1 \
             UNION ALL \
             SELECT n + 1, start - ?2 FROM bucket WHERE n + 1 < ?3 \
         ) \
         SELECT bucket.start, COALESCE({}, 0) \
         FROM bucket LEFT JOIN block \
             ON block.created_time - (((block.created_time % ?2) + ?2) % ?2) = bucket.start \
         GROUP BY bucket.start \
         ORDER BY bucket.start ASC",
        aggregate
    )
}

impl ProjectionStore {
    /// 以当前时间为终点统计每个时间桶
    pub async fn count_per_bucket(
        &self,
        source: BucketSource,
        unit: TimeUnit,
        count: u32,
    ) -> Result<Vec<u64>, IndexerError> {
        self.count_per_bucket_at(source, unit, count, Utc::now()).await
    }

    pub async fn count_per_bucket_at(
        &self,
        source: BucketSource,
        unit: TimeUnit,
        count: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<u64>, IndexerError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let width = unit.millis();
        let last_bucket = truncate_millis(now.timestamp_millis(), width);
        self.with_conn("count_per_bucket", move |conn| {
            let mut stmt = conn.prepare(&bucket_sql(source))?;
            let rows = stmt.query_map(params![last_bucket, width, count], |row| row.get::<_, i64>(1))?;
            let counts = rows.collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(counts.into_iter().map(|count| count as u64).collect())
        })
        .await
    }
}
