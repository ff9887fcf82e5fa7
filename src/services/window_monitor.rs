//! WindowMonitor: responsibility and boundaries
//!
//! Tracks the target application's process, keeps the authoritative "last
//! known window set" and reports additions to the registered handler.
//! It does NOT filter or classify windows and never writes window attributes;
//! those decisions belong to the window fixer.

use crate::events::{MainCommand, Pid, ProcessInfo, SubscriptionId, WindowDiff, WindowHandle, WindowSet};
use crate::services::backend::{Accessibility, AxNotification, EventSink};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Обработчик новых окон: `(added, current, previous)` внутри `WindowDiff`
pub type WindowChangeHandler = Box<dyn FnMut(&WindowDiff) + Send>;

struct Attachment {
    process: ProcessInfo,
    subscription: SubscriptionId,
    tracked: WindowSet,
}

pub struct WindowMonitor {
    bundle_identifier: String,
    accessibility: Arc<dyn Accessibility>,
    main_tx: UnboundedSender<MainCommand>,
    on_change: WindowChangeHandler,
    attachment: Option<Attachment>,
}

impl WindowMonitor {
    pub fn new(
        bundle_identifier: &str,
        accessibility: Arc<dyn Accessibility>,
        main_tx: UnboundedSender<MainCommand>,
        on_change: WindowChangeHandler,
    ) -> Self {
        Self {
            bundle_identifier: bundle_identifier.to_string(),
            accessibility,
            main_tx,
            on_change,
            attachment: None,
        }
    }

    /// Подключается к процессу. Идемпотентно: старая подписка снимается.
    ///
    /// При ошибке монитор остаётся отключённым до следующего запуска
    /// приложения; ошибка только логируется.
    pub fn attach(&mut self, process: &ProcessInfo) -> bool {
        self.detach();

        let pid = process.pid;
        info!("Подключение к приложению {}", process);

        let sink: EventSink = {
            let main_tx = self.main_tx.clone();
            Arc::new(move || {
                // Колбэк ОС: только передаём событие в главный цикл
                let _ = main_tx.send(MainCommand::WindowCreated(pid));
            })
        };

        let subscription = match self
            .accessibility
            .subscribe(pid, AxNotification::WindowCreated, sink)
        {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Не удалось подписаться на окна {}: {}", process, e);
                return false;
            }
        };

        // Базовый набор: уже открытые окна не должны считаться новыми
        let baseline = match self.accessibility.windows(pid) {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Не удалось получить окна {}: {}", process, e);
                self.accessibility.unsubscribe(subscription);
                return false;
            }
        };

        info!("Отслеживаем {}: {} окон на старте", process, baseline.len());
        self.attachment = Some(Attachment {
            process: process.clone(),
            subscription,
            tracked: baseline,
        });
        true
    }

    /// Хук запуска приложения: подключаемся, только если это целевое приложение
    pub fn on_app_will_launch(&mut self, process: &ProcessInfo) -> bool {
        if !process.matches(&self.bundle_identifier) {
            debug!("Запуск {} не относится к {}", process, self.bundle_identifier);
            return false;
        }
        self.attach(process)
    }

    /// Колбэк подписки: сравнивает окна с последним известным набором
    pub fn on_window_created(&mut self, pid: Pid) {
        let Some(attachment) = self.attachment.as_ref() else {
            debug!("Событие окна pid {} без активной подписки", pid);
            return;
        };
        if attachment.process.pid != pid {
            debug!("Событие окна от старого процесса {} проигнорировано", pid);
            return;
        }

        let current = match self.accessibility.windows(pid) {
            Ok(windows) => windows,
            Err(e) => {
                debug!("Не удалось перечитать окна pid {}: {}", pid, e);
                return;
            }
        };

        // Повторное уведомление без новых окон ничего не делает
        let Some(diff) = WindowDiff::between(current, attachment.tracked.clone()) else {
            debug!("pid {}: новых окон нет", pid);
            return;
        };

        info!("pid {}: новых окон {} (всего {})", pid, diff.added.len(), diff.current.len());
        (self.on_change)(&diff);

        // Все текущие окна становятся новой базой, даже отфильтрованные дальше
        if let Some(attachment) = self.attachment.as_mut() {
            attachment.tracked = diff.current;
        }
    }

    /// Процесс завершился: подписка больше недействительна
    pub fn on_app_terminated(&mut self, pid: Pid) {
        if self.attached_pid() == Some(pid) {
            info!("Целевое приложение (pid {}) завершилось", pid);
            self.detach();
        }
    }

    /// Снимает подписку. Без подключения ничего не делает.
    pub fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            self.accessibility.unsubscribe(attachment.subscription);
            info!("Отключение от приложения {}", attachment.process);
        }
    }

    pub fn attached_pid(&self) -> Option<Pid> {
        self.attachment.as_ref().map(|attachment| attachment.process.pid)
    }

    #[allow(dead_code)]
    pub fn tracked_windows(&self) -> &[WindowHandle] {
        self.attachment
            .as_ref()
            .map(|attachment| attachment.tracked.as_slice())
            .unwrap_or(&[])
    }
}

impl Drop for WindowMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Rect;
    use crate::services::backend::{DryRunDesktop, SimWindow};
    use parking_lot::Mutex;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const FINDER: &str = "com.apple.finder";

    struct Harness {
        desktop: Arc<DryRunDesktop>,
        monitor: WindowMonitor,
        rx: UnboundedReceiver<MainCommand>,
        diffs: Arc<Mutex<Vec<WindowDiff>>>,
    }

    impl Harness {
        fn new() -> Self {
            let desktop = Arc::new(DryRunDesktop::new());
            let (tx, rx) = unbounded_channel();
            let diffs = Arc::new(Mutex::new(Vec::new()));
            let sink = diffs.clone();
            let monitor = WindowMonitor::new(
                FINDER,
                desktop.clone(),
                tx,
                Box::new(move |diff| sink.lock().push(diff.clone())),
            );
            Self {
                desktop,
                monitor,
                rx,
                diffs,
            }
        }

        /// Доставляет накопившиеся события подписки в монитор
        fn pump(&mut self) {
            while let Ok(command) = self.rx.try_recv() {
                if let MainCommand::WindowCreated(pid) = command {
                    self.monitor.on_window_created(pid);
                }
            }
        }

        fn window(&self, pid: Pid, title: &str) -> WindowHandle {
            self.desktop.open_window(pid, SimWindow::standard(title, Rect::new(0.0, 0.0, 800.0, 600.0)))
        }
    }

    #[test]
    fn test_existing_windows_become_baseline() {
        let mut h = Harness::new();
        let app = h.desktop.launch_app(FINDER);
        let existing = h.desktop.add_window(app.pid, SimWindow::standard("Old", Rect::default()));

        assert!(h.monitor.attach(&app));
        assert_eq!(h.monitor.tracked_windows(), &[existing]);

        // Ложное уведомление без новых окон
        h.desktop.notify(app.pid, AxNotification::WindowCreated);
        h.pump();
        assert!(h.diffs.lock().is_empty());
    }

    #[test]
    fn test_new_window_is_reported_with_previous_set() {
        let mut h = Harness::new();
        let app = h.desktop.launch_app(FINDER);
        let existing = h.desktop.add_window(app.pid, SimWindow::standard("Old", Rect::default()));
        h.monitor.attach(&app);

        let created = h.window(app.pid, "New");
        h.pump();

        let diffs = h.diffs.lock().clone();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].added.as_slice(), &[created]);
        assert_eq!(diffs[0].previous, vec![existing]);
        assert_eq!(diffs[0].current.len(), 2);
        assert_eq!(h.monitor.tracked_windows().len(), 2);

        // То же уведомление ещё раз: уже не новое окно
        h.desktop.notify(app.pid, AxNotification::WindowCreated);
        h.pump();
        assert_eq!(h.diffs.lock().len(), 1);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut h = Harness::new();
        let app = h.desktop.launch_app(FINDER);

        assert!(h.monitor.attach(&app));
        assert!(h.monitor.attach(&app));
        assert_eq!(h.desktop.subscription_count(), 1);

        h.window(app.pid, "New");
        h.pump();
        assert_eq!(h.diffs.lock().len(), 1);
    }

    #[test]
    fn test_subscription_failure_leaves_monitor_detached_until_next_launch() {
        let mut h = Harness::new();
        let app = h.desktop.launch_app(FINDER);
        h.desktop.set_fail_subscriptions(true);

        assert!(!h.monitor.on_app_will_launch(&app));
        assert_eq!(h.monitor.attached_pid(), None);

        h.desktop.set_fail_subscriptions(false);
        assert!(h.monitor.on_app_will_launch(&app));
        assert_eq!(h.monitor.attached_pid(), Some(app.pid));
    }

    #[test]
    fn test_missing_windows_attribute_does_not_leak_subscription() {
        let mut h = Harness::new();
        let app = h.desktop.launch_app(FINDER);
        h.desktop.set_windows_available(app.pid, false);

        assert!(!h.monitor.attach(&app));
        assert_eq!(h.monitor.attached_pid(), None);
        assert_eq!(h.desktop.subscription_count(), 0);
    }

    #[test]
    fn test_launch_hook_filters_bundle_identifier() {
        let mut h = Harness::new();
        let other = h.desktop.launch_app("com.apple.Safari");

        assert!(!h.monitor.on_app_will_launch(&other));
        assert_eq!(h.desktop.subscription_count(), 0);
    }

    #[test]
    fn test_detach_and_termination() {
        let mut h = Harness::new();
        h.monitor.detach();

        let app = h.desktop.launch_app(FINDER);
        h.monitor.attach(&app);
        h.monitor.on_app_terminated(app.pid + 1);
        assert_eq!(h.monitor.attached_pid(), Some(app.pid));

        h.monitor.on_app_terminated(app.pid);
        assert_eq!(h.monitor.attached_pid(), None);
        assert_eq!(h.desktop.subscription_count(), 0);

        h.monitor.detach();
    }

    #[test]
    fn test_events_from_previous_process_are_ignored() {
        let mut h = Harness::new();
        let old = h.desktop.launch_app(FINDER);
        h.monitor.attach(&old);
        h.desktop.terminate_app(old.pid);

        let new = h.desktop.launch_app(FINDER);
        h.monitor.on_app_will_launch(&new);
        h.monitor.on_window_created(old.pid);
        assert!(h.diffs.lock().is_empty());

        h.window(new.pid, "New");
        h.pump();
        assert_eq!(h.diffs.lock().len(), 1);
    }
}
