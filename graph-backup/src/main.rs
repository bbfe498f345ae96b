use clap::Parser;
use graph_backup::{Cli, CliApp, setup_logging};
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录；文件日志的 guard 在退出前释放以刷新缓冲
    let log_guard = setup_logging(cli.verbose);

    let outcome = match CliApp::new(cli.config.as_deref()) {
        Ok(app) => app.run(cli.command).await.map_err(|e| format!("操作失败: {e}")),
        Err(e) => Err(format!("应用初始化失败: {e}")),
    };

    if let Err(message) = outcome {
        error!("❌ {}", message);
        drop(log_guard);
        std::process::exit(1);
    }
}
