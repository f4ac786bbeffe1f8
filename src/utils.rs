/**
 * 文件描述: 工具函数模块，提供通用工具函数
 * 功能概述:
 * - 计算规范序列化后的 SHA3-256 哈希
 * - 毫秒时间戳与 chrono 时间互转、按时间单位截断
 * - 解析账户所属域
 * - 将批量查询结果按输入键对齐
 */

use std::collections::HashMap;
use std::hash::Hash;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use crate::error::IndexerError;

/// 规范序列化（JSON）后计算 SHA3-256，返回十六进制字符串
pub fn sha3_hex<T: Serialize>(value: &T) -> Result<String, IndexerError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha3_256::digest(&bytes)))
}

/// 账户ID形如 `name@domain`，返回 `@` 之后的部分
pub fn account_domain(account_id: &str) -> &str {
    match account_id.split_once('@') {
        Some((_, domain)) => domain,
        None => "",
    }
}

/// 毫秒时间戳转为 UTC 时间
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// 将毫秒时间戳向下截断到 `unit_millis` 的整数倍
pub fn truncate_millis(millis: i64, unit_millis: i64) -> i64 {
    millis - millis.rem_euclid(unit_millis)
}

/// 将查询结果按输入键顺序对齐，包括重复键；未命中的位置为 None
pub fn align_by_keys<K, T, F>(keys: &[K], items: Vec<T>, key_of: F) -> Vec<Option<T>>
where
    K: Eq + Hash,
    T: Clone,
    F: Fn(&T) -> K,
{
    let mut lookup: HashMap<K, T> = HashMap::with_capacity(items.len());
    for item in items {
        // 同一个键命中多行时保留第一行
        lookup.entry(key_of(&item)).or_insert(item);
    }
    keys.iter().map(|key| lookup.get(key).cloned()).collect()
}
