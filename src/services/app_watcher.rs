use crate::error::Result;
use crate::events::{MainCommand, Pid};
use crate::services::backend::AppDirectory;
use crate::services::BackgroundService;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Следит за жизненным циклом целевого приложения и сообщает о запуске и
/// завершении процесса в главный цикл
pub struct AppWatcher {
    apps: Arc<dyn AppDirectory>,
    bundle_identifier: String,
    period: Duration,
    main_tx: UnboundedSender<MainCommand>,
    known_pid: Option<Pid>,
}

impl AppWatcher {
    pub fn new(
        apps: Arc<dyn AppDirectory>,
        bundle_identifier: &str,
        poll_interval_ms: u64,
        main_tx: UnboundedSender<MainCommand>,
    ) -> Self {
        Self {
            apps,
            bundle_identifier: bundle_identifier.to_string(),
            period: Duration::from_millis(poll_interval_ms),
            main_tx,
            known_pid: None,
        }
    }

    /// Процесс, к которому главный цикл уже подключился на старте
    pub fn with_known_pid(mut self, pid: Option<Pid>) -> Self {
        self.known_pid = pid;
        self
    }

    /// Один опрос: событие, если процесс появился, сменился или исчез
    pub fn poll(&mut self) -> Option<MainCommand> {
        let running = self.apps.running_app(&self.bundle_identifier);

        let command = match (self.known_pid, &running) {
            (None, Some(process)) => {
                info!("Приложение {} запущено", process);
                Some(MainCommand::AppWillLaunch(process.clone()))
            }
            (Some(known), Some(process)) if known != process.pid => {
                info!("Приложение {} перезапущено (был pid {})", process, known);
                Some(MainCommand::AppWillLaunch(process.clone()))
            }
            (Some(known), None) => Some(MainCommand::AppTerminated(known)),
            _ => None,
        };

        self.known_pid = running.map(|process| process.pid);
        command
    }

    async fn run_impl(mut self) -> Result<()> {
        info!(
            "Отслеживание запуска {} каждые {:?}",
            self.bundle_identifier, self.period
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.main_tx.closed() => {
                    debug!("Главный цикл остановлен, AppWatcher завершается");
                    return Ok(());
                }
            }

            if let Some(command) = self.poll() {
                if self.main_tx.send(command).is_err() {
                    debug!("Главный цикл остановлен, AppWatcher завершается");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl BackgroundService for AppWatcher {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}
