use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统
///
/// 指定 log_file 时日志按天滚动写入文件，guard 需由调用方持有到进程结束。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    // 解析日志级别
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 文件输出（按天滚动）
    if let Some(path) = log_file {
        let path = std::path::Path::new(path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "examtrust.log".to_string());

        let appender = tracing_appender::rolling::daily(dir, prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        match log_format {
            Some("json") => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(writer).with_ansi(false))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().compact().with_writer(writer).with_ansi(false))
                    .init();
            }
        }

        return Ok(Some(guard));
    }

    // 根据格式选择不同的输出方式
    match log_format {
        Some("json") => {
            // JSON 格式（适合生产环境）
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        Some("pretty") | Some("dev") => {
            // Pretty 格式（适合开发环境）
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
        _ => {
            // Compact 格式（默认）
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .init();
        }
    }

    Ok(None)
}
