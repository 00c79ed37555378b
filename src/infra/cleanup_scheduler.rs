use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::auth::device_registry::DeviceRegistry;
use crate::auth::session_manager::SessionManager;
use crate::config::CleanupConfig;
use crate::infra::verification_store::VerificationCodeStore;

/// 单轮清理结果
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// 本轮停用的过期设备数
    pub devices: usize,
    /// 本轮处理的过期会话数
    pub sessions: usize,
    /// 本轮清理的过期验证码数
    pub codes: u64,
    /// 本轮是否有清理项失败
    pub failed: bool,
}

/// 后台清理调度器
///
/// 固定间隔依次清理过期设备、过期会话与过期验证码。
/// 三类清理互相独立：一类失败不影响其余两类执行；
/// 任一失败本轮记为失败，下一轮改用缩短的退避间隔。
/// 单轮失败不会终止循环，循环只在收到停止信号时退出，
/// 停止信号能立即打断休眠。
pub struct CleanupScheduler {
    device_registry: Arc<DeviceRegistry>,
    session_manager: Arc<SessionManager>,
    verification_codes: Arc<dyn VerificationCodeStore>,
    config: CleanupConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    pub fn new(
        device_registry: Arc<DeviceRegistry>,
        session_manager: Arc<SessionManager>,
        verification_codes: Arc<dyn VerificationCodeStore>,
        config: CleanupConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            device_registry,
            session_manager,
            verification_codes,
            config,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// 启动后台清理循环
    pub fn start(&self) {
        let device_registry = Arc::clone(&self.device_registry);
        let session_manager = Arc::clone(&self.session_manager);
        let verification_codes = Arc::clone(&self.verification_codes);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(
                "🧹 清理任务启动: interval={}s, failure_backoff={}s",
                config.interval_secs, config.failure_backoff_secs
            );

            let mut delay = config.interval();

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {
                        let report = sweep_with(
                            &device_registry,
                            &session_manager,
                            verification_codes.as_ref(),
                        )
                        .await;

                        delay = if report.failed {
                            debug!(
                                "本轮清理有失败项，{}s 后重试",
                                config.failure_backoff_secs
                            );
                            config.failure_backoff()
                        } else {
                            config.interval()
                        };
                    }
                }
            }

            info!("清理任务退出");
        });

        let mut guard = self.handle.lock().unwrap();
        if let Some(old) = guard.replace(handle) {
            // 重复 start 只保留最新任务
            old.abort();
        }
    }

    /// 停止清理循环并等待任务退出
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = {
            let mut guard = self.handle.lock().unwrap();
            guard.take()
        };

        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!("清理任务已停止");
    }

    /// 执行一轮清理（sweep 子命令与测试用）
    pub async fn sweep_once(&self) -> SweepReport {
        sweep_with(
            &self.device_registry,
            &self.session_manager,
            self.verification_codes.as_ref(),
        )
        .await
    }
}

/// 三类清理各自记录结果，互不阻断
async fn sweep_with(
    device_registry: &DeviceRegistry,
    session_manager: &SessionManager,
    verification_codes: &dyn VerificationCodeStore,
) -> SweepReport {
    let mut report = SweepReport::default();

    match device_registry.sweep_expired_devices().await {
        Ok(count) => report.devices = count,
        Err(e) => {
            error!("清理过期设备失败: {}", e);
            report.failed = true;
        }
    }

    match session_manager.sweep_expired_sessions().await {
        Ok(count) => report.sessions = count,
        Err(e) => {
            error!("清理过期会话失败: {}", e);
            report.failed = true;
        }
    }

    match verification_codes.cleanup_expired().await {
        Ok(count) => report.codes = count,
        Err(e) => {
            error!("清理过期验证码失败: {}", e);
            report.failed = true;
        }
    }

    info!(
        "清理完成: devices={}, sessions={}, codes={}, failed={}",
        report.devices, report.sessions, report.codes, report.failed
    );

    report
}
