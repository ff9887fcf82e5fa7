//! MainLoop: responsibility and boundaries
//!
//! The single cooperative event loop of the daemon. It owns the window
//! monitor and is the only place where window attributes are written:
//! subscription callbacks and animation ticks only enqueue `MainCommand`s.

use crate::config::ConfigStore;
use crate::error::Result;
use crate::events::{MainCommand, Pid};
use crate::services::backend::{AppDirectory, Backend};
use crate::services::classifier::WindowClassifier;
use crate::services::frame_animator::FrameAnimator;
use crate::services::window_fixer::WindowFixer;
use crate::services::window_monitor::WindowMonitor;
use crate::services::BackgroundService;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

pub struct MainLoop {
    bundle_identifier: String,
    apps: Arc<dyn AppDirectory>,
    monitor: WindowMonitor,
    animator: Arc<FrameAnimator>,
    rx: UnboundedReceiver<MainCommand>,
}

impl MainLoop {
    pub fn new(
        config: Arc<ConfigStore>,
        backend: &Backend,
        main_tx: UnboundedSender<MainCommand>,
        rx: UnboundedReceiver<MainCommand>,
    ) -> Self {
        // Целевое приложение фиксируется на старте; перезагрузка настроек
        // меняет только геометрию и анимацию
        let bundle_identifier = config.snapshot().target.bundle_identifier.clone();

        let animator = Arc::new(FrameAnimator::new(
            backend.accessibility.clone(),
            backend.clock.clone(),
            main_tx.clone(),
        ));
        let fixer = WindowFixer::new(
            config,
            backend.accessibility.clone(),
            backend.screens.clone(),
            WindowClassifier::new(backend.volumes.clone()),
            animator.clone(),
        );
        let monitor = WindowMonitor::new(
            &bundle_identifier,
            backend.accessibility.clone(),
            main_tx,
            Box::new(move |diff| {
                fixer.handle_new_windows(diff);
            }),
        );

        Self {
            bundle_identifier,
            apps: backend.apps.clone(),
            monitor,
            animator,
            rx,
        }
    }

    /// Подключение к уже запущенному целевому приложению
    pub fn attach_if_running(&mut self) -> Option<Pid> {
        match self.apps.running_app(&self.bundle_identifier) {
            Some(process) => {
                self.monitor.on_app_will_launch(&process);
                self.monitor.attached_pid()
            }
            None => {
                info!("{} не запущено, ждём запуска", self.bundle_identifier);
                None
            }
        }
    }

    /// Обрабатывает одну команду; `false`: пора останавливаться
    pub fn handle(&mut self, command: MainCommand) -> bool {
        match command {
            MainCommand::AppWillLaunch(process) => {
                self.monitor.on_app_will_launch(&process);
            }
            MainCommand::AppTerminated(pid) => {
                self.monitor.on_app_terminated(pid);
            }
            MainCommand::WindowCreated(pid) => {
                self.monitor.on_window_created(pid);
            }
            MainCommand::ApplyFrame(update) => {
                self.animator.apply_update(update);
            }
            MainCommand::Shutdown => {
                info!("Главный цикл получил команду завершения");
                return false;
            }
        }
        true
    }

    fn shutdown(&mut self) {
        self.animator.cancel_all();
        self.monitor.detach();
    }

    async fn run_impl(mut self) -> Result<()> {
        info!("Главный цикл запущен");

        while let Some(command) = self.rx.recv().await {
            if !self.handle(command) {
                break;
            }
        }

        self.shutdown();
        debug!("Главный цикл остановлен");
        Ok(())
    }
}

#[async_trait::async_trait]
impl BackgroundService for MainLoop {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}
