use crate::error::{Result, SnapError};
use crate::events::{Pid, ProcessInfo, Rect, SubscriptionId, WindowHandle, WindowSet};
use crate::services::classifier::{VolumeProbe, VOLUMES_ROOT};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use super::r#trait::{
    Accessibility, AppDirectory, Attribute, AttributeValue, AxNotification, EventSink, Screen,
    ScreenTopology, Topology,
};

/// Окно симулированного рабочего стола
#[derive(Debug, Clone, PartialEq)]
pub struct SimWindow {
    pub role: Option<String>,
    pub subrole: Option<String>,
    pub title: Option<String>,
    pub frame: Rect,
}

impl SimWindow {
    pub fn standard(title: &str, frame: Rect) -> Self {
        Self {
            role: Some("AXWindow".to_string()),
            subrole: Some("AXStandardWindow".to_string()),
            title: Some(title.to_string()),
            frame,
        }
    }

    pub fn quick_look(frame: Rect) -> Self {
        Self {
            role: Some("AXWindow".to_string()),
            subrole: Some(crate::services::classifier::QUICK_LOOK_SUBROLE.to_string()),
            title: None,
            frame,
        }
    }

    #[allow(dead_code)]
    pub fn untitled(frame: Rect) -> Self {
        Self {
            title: None,
            ..Self::standard("", frame)
        }
    }

    /// Окно без роли: элемент уже невалиден
    #[allow(dead_code)]
    pub fn stale(frame: Rect) -> Self {
        Self {
            role: None,
            subrole: None,
            title: None,
            frame,
        }
    }
}

/// Сколько последних записей атрибутов хранит журнал
pub const WRITE_LOG_CAPACITY: usize = 256;

/// Запись атрибута, выполненная через Accessibility
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWrite {
    pub window: WindowHandle,
    pub value: AttributeValue,
}

struct SimApp {
    info: ProcessInfo,
    windows: WindowSet,
    windows_available: bool,
}

struct Subscription {
    pid: Pid,
    notification: AxNotification,
    sink: EventSink,
}

struct DesktopState {
    apps: Vec<SimApp>,
    windows: HashMap<WindowHandle, SimWindow>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    topology: Topology,
    mounted_images: HashSet<PathBuf>,
    writes: VecDeque<AttributeWrite>,
    fail_subscriptions: bool,
    trusted: bool,
}

/// Симулированный рабочий стол для режима `--dry-run` и тестов.
///
/// Реализует все интерфейсы бэкенда в памяти: приложения, окна, дисплеи,
/// подписки на создание окон и журнал записей атрибутов.
pub struct DryRunDesktop {
    state: Mutex<DesktopState>,
    next_id: AtomicU64,
}

impl Default for DryRunDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunDesktop {
    pub fn new() -> Self {
        Self::with_topology(Topology::single(Screen {
            frame: Rect::new(0.0, 0.0, 1440.0, 900.0),
            // Меню-бар 25pt сверху
            visible_frame: Rect::new(0.0, 0.0, 1440.0, 875.0),
        }))
    }

    pub fn with_topology(topology: Topology) -> Self {
        Self {
            state: Mutex::new(DesktopState {
                apps: Vec::new(),
                windows: HashMap::new(),
                subscriptions: HashMap::new(),
                topology,
                mounted_images: HashSet::new(),
                writes: VecDeque::with_capacity(WRITE_LOG_CAPACITY),
                fail_subscriptions: false,
                trusted: true,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn launch_app(&self, bundle_identifier: &str) -> ProcessInfo {
        let info = ProcessInfo::new(1000 + self.next_id() as Pid, bundle_identifier);
        info!("[DRY RUN] Запуск приложения {}", info);
        self.state.lock().apps.push(SimApp {
            info: info.clone(),
            windows: Vec::new(),
            windows_available: true,
        });
        info
    }

    pub fn terminate_app(&self, pid: Pid) {
        let mut state = self.state.lock();
        if let Some(index) = state.apps.iter().position(|app| app.info.pid == pid) {
            let app = state.apps.remove(index);
            for window in app.windows {
                state.windows.remove(&window);
            }
            info!("[DRY RUN] Приложение {} завершено", app.info);
        }
    }

    /// Добавляет окно без уведомления подписчиков (уже существующее окно)
    pub fn add_window(&self, pid: Pid, window: SimWindow) -> WindowHandle {
        let handle = WindowHandle::new(self.next_id());
        let mut state = self.state.lock();
        if let Some(app) = state.apps.iter_mut().find(|app| app.info.pid == pid) {
            app.windows.push(handle);
        }
        state.windows.insert(handle, window);
        handle
    }

    /// Открывает окно и доставляет `AXWindowCreated` подписчикам процесса
    pub fn open_window(&self, pid: Pid, window: SimWindow) -> WindowHandle {
        let handle = self.add_window(pid, window);
        self.notify(pid, AxNotification::WindowCreated);
        handle
    }

    /// Повторно доставляет уведомление без изменения окон
    pub fn notify(&self, pid: Pid, notification: AxNotification) {
        // Колбэки вызываются вне блокировки: они могут читать рабочий стол
        let sinks: Vec<EventSink> = self
            .state
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.pid == pid && sub.notification == notification)
            .map(|sub| sub.sink.clone())
            .collect();

        for sink in sinks {
            sink();
        }
    }

    #[allow(dead_code)]
    pub fn close_window(&self, window: WindowHandle) {
        let mut state = self.state.lock();
        state.windows.remove(&window);
        for app in state.apps.iter_mut() {
            app.windows.retain(|candidate| *candidate != window);
        }
    }

    pub fn window_frame(&self, window: WindowHandle) -> Option<Rect> {
        self.state.lock().windows.get(&window).map(|sim| sim.frame)
    }

    pub fn mount_image(&self, name: &str) {
        self.state
            .lock()
            .mounted_images
            .insert(Path::new(VOLUMES_ROOT).join(name));
    }

    /// Последние записи атрибутов, не больше `WRITE_LOG_CAPACITY`
    #[allow(dead_code)]
    pub fn writes(&self) -> Vec<AttributeWrite> {
        self.state.lock().writes.iter().cloned().collect()
    }

    #[allow(dead_code)]
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    #[allow(dead_code)]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    #[allow(dead_code)]
    pub fn set_topology(&self, topology: Topology) {
        self.state.lock().topology = topology;
    }

    #[allow(dead_code)]
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.state.lock().fail_subscriptions = fail;
    }

    #[allow(dead_code)]
    pub fn set_trusted(&self, trusted: bool) {
        self.state.lock().trusted = trusted;
    }

    /// Имитирует приложение, у которого ещё нет атрибута `AXWindows`
    #[allow(dead_code)]
    pub fn set_windows_available(&self, pid: Pid, available: bool) {
        if let Some(app) = self.state.lock().apps.iter_mut().find(|app| app.info.pid == pid) {
            app.windows_available = available;
        }
    }
}

impl Accessibility for DryRunDesktop {
    fn is_trusted(&self) -> bool {
        self.state.lock().trusted
    }

    fn windows(&self, pid: Pid) -> Result<WindowSet> {
        let state = self.state.lock();
        let app = state
            .apps
            .iter()
            .find(|app| app.info.pid == pid)
            .ok_or_else(|| SnapError::Accessibility(format!("процесс {} не найден", pid)))?;

        if !app.windows_available {
            return SnapError::accessibility(format!("у процесса {} нет атрибута AXWindows", pid));
        }

        Ok(app.windows.clone())
    }

    fn attribute(&self, window: WindowHandle, attribute: Attribute) -> Option<AttributeValue> {
        let state = self.state.lock();
        let sim = state.windows.get(&window)?;
        match attribute {
            Attribute::Role => sim.role.clone().map(AttributeValue::Role),
            Attribute::Subrole => sim.subrole.clone().map(AttributeValue::Subrole),
            Attribute::Title => sim.title.clone().map(AttributeValue::Title),
            Attribute::Size => Some(AttributeValue::Size(sim.frame.size)),
            Attribute::Position => Some(AttributeValue::Position(sim.frame.origin)),
            Attribute::Windows => None,
        }
    }

    fn set_attribute(&self, window: WindowHandle, value: AttributeValue) -> Result<()> {
        let mut state = self.state.lock();
        let Some(sim) = state.windows.get_mut(&window) else {
            return SnapError::accessibility(format!("{} больше не существует", window));
        };

        match &value {
            AttributeValue::Size(size) => sim.frame.size = *size,
            AttributeValue::Position(position) => sim.frame.origin = *position,
            other => {
                return SnapError::accessibility(format!(
                    "атрибут {} доступен только для чтения",
                    other.attribute()
                ))
            }
        }

        debug!("[DRY RUN] {} <- {:?}", window, value);
        if state.writes.len() == WRITE_LOG_CAPACITY {
            state.writes.pop_front();
        }
        state.writes.push_back(AttributeWrite { window, value });
        Ok(())
    }

    fn subscribe(&self, pid: Pid, notification: AxNotification, sink: EventSink) -> Result<SubscriptionId> {
        let mut state = self.state.lock();
        if state.fail_subscriptions {
            return Err(SnapError::Subscription(format!(
                "не удалось создать наблюдатель для pid {}",
                pid
            )));
        }
        if !state.apps.iter().any(|app| app.info.pid == pid) {
            return Err(SnapError::Subscription(format!("процесс {} не найден", pid)));
        }

        let id = SubscriptionId(self.next_id());
        state.subscriptions.insert(
            id,
            Subscription {
                pid,
                notification,
                sink,
            },
        );
        debug!("[DRY RUN] Подписка {:?} на {} для pid {}", id, notification.name(), pid);
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if self.state.lock().subscriptions.remove(&subscription).is_some() {
            debug!("[DRY RUN] Подписка {:?} удалена", subscription);
        }
    }
}

impl ScreenTopology for DryRunDesktop {
    fn topology(&self) -> Topology {
        self.state.lock().topology.clone()
    }
}

impl AppDirectory for DryRunDesktop {
    fn running_app(&self, bundle_identifier: &str) -> Option<ProcessInfo> {
        self.state
            .lock()
            .apps
            .iter()
            .find(|app| app.info.matches(bundle_identifier))
            .map(|app| app.info.clone())
    }
}

impl VolumeProbe for DryRunDesktop {
    fn is_directory(&self, path: &Path) -> bool {
        self.state.lock().mounted_images.contains(path)
    }

    fn is_startup_volume(&self, _path: &Path) -> Option<bool> {
        Some(false)
    }

    fn is_read_only(&self, path: &Path) -> Option<bool> {
        Some(self.state.lock().mounted_images.contains(path))
    }
}

/// Демонстрационный сценарий для `--dry-run`: периодически открывает окна
/// целевого приложения, включая окно образа диска и панель Quick Look
pub struct DryRunScenario {
    desktop: Arc<DryRunDesktop>,
    bundle_identifier: String,
    period: Duration,
}

impl DryRunScenario {
    pub fn new(desktop: Arc<DryRunDesktop>, bundle_identifier: &str) -> Self {
        Self {
            desktop,
            bundle_identifier: bundle_identifier.to_string(),
            period: Duration::from_secs(10),
        }
    }

    pub async fn run(self) {
        info!("Dry-run режим - эмулируем окна приложения {}", self.bundle_identifier);

        self.desktop.mount_image("Install Demo");

        let fake_windows = [
            SimWindow::standard("Recents", Rect::new(40.0, 60.0, 800.0, 500.0)),
            SimWindow::standard("Downloads", Rect::new(120.0, 90.0, 640.0, 420.0)),
            SimWindow::standard("Install Demo", Rect::new(200.0, 200.0, 500.0, 350.0)),
            SimWindow::quick_look(Rect::new(300.0, 150.0, 600.0, 600.0)),
        ];

        let mut window_index = 0;
        let mut ticker = interval(self.period);

        loop {
            ticker.tick().await;

            let app = match self.desktop.running_app(&self.bundle_identifier) {
                Some(app) => app,
                None => self.desktop.launch_app(&self.bundle_identifier),
            };

            let window = fake_windows[window_index].clone();
            info!(
                "Dry-run: открываем окно {:?} в {}",
                window.title.as_deref().unwrap_or("<без заголовка>"),
                window.frame
            );
            let handle = self.desktop.open_window(app.pid, window);

            let desktop = self.desktop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                match desktop.window_frame(handle) {
                    Some(frame) => info!("Dry-run: {} теперь {}", handle, frame),
                    None => warn!("Dry-run: {} исчезло", handle),
                }
            });

            window_index = (window_index + 1) % fake_windows.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::WindowAttributes;
    use crate::events::Size;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_open_window_notifies_matching_subscribers_only() {
        let desktop = DryRunDesktop::new();
        let finder = desktop.launch_app("com.apple.finder");
        let other = desktop.launch_app("com.example.other");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        desktop
            .subscribe(
                finder.pid,
                AxNotification::WindowCreated,
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("subscribe");

        desktop.open_window(other.pid, SimWindow::standard("x", Rect::default()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        desktop.open_window(finder.pid, SimWindow::standard("y", Rect::default()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attribute_writes_are_recorded() {
        let desktop = DryRunDesktop::new();
        let app = desktop.launch_app("com.apple.finder");
        let window = desktop.add_window(app.pid, SimWindow::standard("w", Rect::new(0.0, 0.0, 10.0, 10.0)));

        desktop.set_size(window, Size::new(20.0, 30.0)).expect("set size");
        assert_eq!(desktop.size(window), Some(Size::new(20.0, 30.0)));
        assert_eq!(desktop.writes().len(), 1);

        assert!(desktop
            .set_attribute(window, AttributeValue::Title("nope".into()))
            .is_err());
        desktop.close_window(window);
        assert!(desktop.set_size(window, Size::new(1.0, 1.0)).is_err());
        assert_eq!(desktop.writes().len(), 1);
    }

    #[test]
    fn test_write_log_keeps_only_latest_entries() {
        let desktop = DryRunDesktop::new();
        let app = desktop.launch_app("com.apple.finder");
        let window = desktop.add_window(app.pid, SimWindow::standard("w", Rect::new(0.0, 0.0, 10.0, 10.0)));

        for i in 0..WRITE_LOG_CAPACITY + 40 {
            desktop
                .set_size(window, Size::new(i as f64, 1.0))
                .expect("set size");
        }

        let writes = desktop.writes();
        assert_eq!(writes.len(), WRITE_LOG_CAPACITY);
        assert_eq!(
            writes.last().map(|w| w.value.clone()),
            Some(AttributeValue::Size(Size::new((WRITE_LOG_CAPACITY + 39) as f64, 1.0)))
        );
        assert_eq!(
            writes.first().map(|w| w.value.clone()),
            Some(AttributeValue::Size(Size::new(40.0, 1.0)))
        );
    }

    #[test]
    fn test_windows_unavailable_and_unknown_pid_fail() {
        let desktop = DryRunDesktop::new();
        let app = desktop.launch_app("com.apple.finder");
        assert!(desktop.windows(app.pid).expect("windows").is_empty());

        desktop.set_windows_available(app.pid, false);
        assert!(desktop.windows(app.pid).is_err());
        assert!(desktop.windows(-1).is_err());
    }
}
