use std::sync::Arc;
use config as config_rs;
use log::{info, warn};
use crate::blockchain::{ChainClient, WsTransport};
use crate::error::IndexerError;
use crate::models::{AppArgs, Config as AppConfig, LedgerConfig};

/// 环境变量前缀，例如 EXPLORER__LEDGER__URL
const ENV_PREFIX: &str = "EXPLORER";

/// 加载应用配置：config.toml（可选）叠加 EXPLORER__ 前缀的环境变量
pub fn load_config() -> Result<AppConfig, IndexerError> {
    let settings = config_rs::Config::builder()
        .add_source(config_rs::File::with_name("config").required(false))
        .add_source(
            config_rs::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings_to_config(settings)
}

fn settings_to_config(settings: config_rs::Config) -> Result<AppConfig, IndexerError> {
    // 如果没有找到任何配置，返回错误
    if settings.get_string("database_path").is_err() {
        return Err(IndexerError::Config(
            "未找到 database_path。请创建config.toml或设置 EXPLORER__DATABASE_PATH".to_string(),
        ));
    }

    let cfg: AppConfig = settings.try_deserialize()?;
    if cfg.ledger.url.trim().is_empty() {
        return Err(IndexerError::Config("ledger.url 不能为空".to_string()));
    }
    Ok(cfg)
}

/// 解析命令行参数
pub fn parse_args<I>(args: I) -> AppArgs
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = AppArgs::default();
    for arg in args {
        match arg.as_str() {
            "--reset" => {
                info!("检测到重置参数 --reset");
                parsed.reset = true;
            }
            other => warn!("忽略未知参数: {}", other),
        }
    }
    parsed
}

/// 根据配置创建账本客户端
pub fn create_chain_client(ledger: &LedgerConfig) -> Result<Arc<ChainClient<WsTransport>>, IndexerError> {
    info!("账本节点: {}, 查询账户: {}", ledger.url, ledger.account_id);
    let transport = WsTransport::new(&ledger.url);
    Ok(Arc::new(ChainClient::new(transport, ledger)?))
}
