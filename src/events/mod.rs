pub mod geometry;
pub mod window;

pub use geometry::{Point, Rect, Size};
pub use window::{Pid, ProcessInfo, WindowDiff, WindowHandle, WindowSet};

/// Идентификатор подписки на уведомления Accessibility API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Кадр анимации, который нужно применить к окну в главном цикле
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUpdate {
    pub window: WindowHandle,
    /// Поколение задачи анимации; устаревшие кадры отбрасываются
    pub generation: u64,
    pub frame: Rect,
    /// Последний кадр: точный целевой фрейм, после него задача завершается
    pub is_final: bool,
    pub timestamp: std::time::Instant,
}

impl FrameUpdate {
    pub fn new(window: WindowHandle, generation: u64, frame: Rect, is_final: bool) -> Self {
        Self {
            window,
            generation,
            frame,
            is_final,
            timestamp: std::time::Instant::now(),
        }
    }
}

/// Команды единственного событийного цикла, в котором выполняются все
/// записи атрибутов окон
#[derive(Debug, Clone)]
pub enum MainCommand {
    /// Целевое приложение запускается (или обнаружено запущенным)
    AppWillLaunch(ProcessInfo),
    /// Процесс целевого приложения завершился
    AppTerminated(Pid),
    /// Сработала подписка на создание окна в процессе
    WindowCreated(Pid),
    /// Очередной кадр анимации из потока таймера
    ApplyFrame(FrameUpdate),
    Shutdown,
}
