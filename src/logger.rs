/**
 * 文件描述: 日志初始化
 * 功能概述:
 * - 配置了 [log] 时使用 log4rs: 控制台输出，可选的按大小滚动的文件输出
 * - 未配置时回退到 env_logger，级别由 RUST_LOG 决定，默认 info
 */

use std::str::FromStr;
use env_logger::Env;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use crate::error::IndexerError;
use crate::models::LogConfig;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} [{M}] {m}{n}";

fn parse_level(level: &str) -> Result<LevelFilter, IndexerError> {
    LevelFilter::from_str(level)
        .map_err(|_| IndexerError::Config(format!("无效的日志级别: {}", level)))
}

fn config_error<E: std::fmt::Display>(e: E) -> IndexerError {
    IndexerError::Config(format!("日志配置错误: {}", e))
}

/// 根据 LogConfig 构建 log4rs 配置
pub fn build_log4rs_config(log: &LogConfig) -> Result<Config, IndexerError> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(parse_level(&log.console_level)?)))
            .build("console", Box::new(console)),
    );
    let mut root = Root::builder().appender("console");

    if log.file_enabled {
        let roller = FixedWindowRoller::builder()
            .build(&format!("{}.{{}}", log.file), log.max_files)
            .map_err(config_error)?;
        let trigger = SizeTrigger::new(log.max_size * 1024 * 1024);
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));
        let file = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(&log.file, Box::new(policy))
            .map_err(config_error)?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    builder.build(root.build(parse_level(&log.level)?)).map_err(config_error)
}

/// 初始化日志系统
pub fn init_logging(log: Option<&LogConfig>) -> Result<(), IndexerError> {
    match log {
        Some(log) => {
            let config = build_log4rs_config(log)?;
            log4rs::init_config(config).map_err(config_error)?;
        }
        None => {
            env_logger::Builder::from_env(Env::default().default_filter_or("info"))
                .try_init()
                .map_err(config_error)?;
        }
    }
    Ok(())
}
