/**
 * 文件描述: 同步模块入口，负责把账本区块同步到投影
 * 功能概述:
 * - 导出同步相关子模块
 * - 重新导出常用同步功能
 *
 * 主要组件:
 * - orchestrator模块: 追赶扫描与实时订阅的合流、顺序应用与停止
 */

pub mod orchestrator;

// 重新导出常用同步功能，方便使用
pub use orchestrator::{start_sync, SyncHandle, SyncStopper};
