use std::error::Error;
use log::{error, info, warn};
use explorer_rs::config::{create_chain_client, load_config, parse_args};
use explorer_rs::db::ProjectionStore;
use explorer_rs::logger::init_logging;
use explorer_rs::sync::start_sync;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 加载配置
    let cfg = load_config()?;
    let args = parse_args(std::env::args().skip(1));

    // 初始化日志系统
    init_logging(cfg.log.as_ref())?;
    info!("区块浏览器索引服务启动");

    // 初始化投影数据库
    let store = ProjectionStore::open(&cfg.database_path)?;
    if args.reset {
        warn!("重置投影数据，将从高度 1 重新同步");
        store.reset().await?;
    } else {
        store.init().await?;
    }
    info!(
        "当前投影: {} 个区块, {} 笔交易, {} 个账户",
        store.block_count().await?,
        store.transaction_count().await?,
        store.account_count().await?
    );

    if cfg.disable_sync.unwrap_or(false) {
        info!("已禁用同步，退出");
        return Ok(());
    }

    let client = create_chain_client(&cfg.ledger)?;
    let handle = start_sync(client, store);

    // 收到 Ctrl-C 时请求停止，当前区块应用完成后退出
    let stopper = handle.stopper();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("收到 Ctrl-C，正在停止同步");
                stopper.stop();
            }
            Err(e) => error!("监听 Ctrl-C 失败: {}", e),
        }
    });

    handle.wait().await?;
    info!("服务已退出");
    Ok(())
}
