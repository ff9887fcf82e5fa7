use crate::config::ScreenSelector;
use crate::error::Result;
use crate::events::{Pid, Point, ProcessInfo, Rect, Size, SubscriptionId, WindowHandle, WindowSet};
use std::fmt;
use std::sync::Arc;

/// Атрибуты Accessibility API, которые реально используются
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Role,
    Subrole,
    Title,
    Size,
    Position,
    Windows,
}

impl Attribute {
    /// Имя атрибута в Accessibility API
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::Role => "AXRole",
            Attribute::Subrole => "AXSubrole",
            Attribute::Title => "AXTitle",
            Attribute::Size => "AXSize",
            Attribute::Position => "AXPosition",
            Attribute::Windows => "AXWindows",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Типизированное значение атрибута
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Role(String),
    Subrole(String),
    Title(String),
    Size(Size),
    Position(Point),
}

impl AttributeValue {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeValue::Role(_) => Attribute::Role,
            AttributeValue::Subrole(_) => Attribute::Subrole,
            AttributeValue::Title(_) => Attribute::Title,
            AttributeValue::Size(_) => Attribute::Size,
            AttributeValue::Position(_) => Attribute::Position,
        }
    }
}

/// Уведомления, на которые можно подписаться
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxNotification {
    WindowCreated,
}

impl AxNotification {
    pub fn name(&self) -> &'static str {
        match self {
            AxNotification::WindowCreated => "AXWindowCreated",
        }
    }
}

/// Колбэк подписки. Вызывается на потоке бэкенда, поэтому должен только
/// передать событие дальше, не трогая окна.
pub type EventSink = Arc<dyn Fn() + Send + Sync>;

/// Источник снимков окон: обёртка над Accessibility API ОС.
///
/// Все операции могут завершиться неудачей; вызывающий код деградирует до
/// no-op и никогда не паникует.
pub trait Accessibility: Send + Sync {
    /// Разрешён ли процессу доступ к Accessibility API
    fn is_trusted(&self) -> bool;

    /// Текущие top-level окна процесса (атрибут `AXWindows` приложения)
    fn windows(&self, pid: Pid) -> Result<WindowSet>;

    fn attribute(&self, window: WindowHandle, attribute: Attribute) -> Option<AttributeValue>;

    fn set_attribute(&self, window: WindowHandle, value: AttributeValue) -> Result<()>;

    fn subscribe(&self, pid: Pid, notification: AxNotification, sink: EventSink) -> Result<SubscriptionId>;

    /// Безопасно для уже удалённой подписки
    fn unsubscribe(&self, subscription: SubscriptionId);
}

/// Типизированные геттеры/сеттеры поверх `Accessibility`
pub trait WindowAttributes: Accessibility {
    fn role(&self, window: WindowHandle) -> Option<String> {
        match self.attribute(window, Attribute::Role)? {
            AttributeValue::Role(role) => Some(role),
            _ => None,
        }
    }

    fn subrole(&self, window: WindowHandle) -> Option<String> {
        match self.attribute(window, Attribute::Subrole)? {
            AttributeValue::Subrole(subrole) => Some(subrole),
            _ => None,
        }
    }

    fn title(&self, window: WindowHandle) -> Option<String> {
        match self.attribute(window, Attribute::Title)? {
            AttributeValue::Title(title) => Some(title),
            _ => None,
        }
    }

    fn size(&self, window: WindowHandle) -> Option<Size> {
        match self.attribute(window, Attribute::Size)? {
            AttributeValue::Size(size) => Some(size),
            _ => None,
        }
    }

    fn position(&self, window: WindowHandle) -> Option<Point> {
        match self.attribute(window, Attribute::Position)? {
            AttributeValue::Position(position) => Some(position),
            _ => None,
        }
    }

    fn frame(&self, window: WindowHandle) -> Option<Rect> {
        Some(Rect::from_parts(self.position(window)?, self.size(window)?))
    }

    fn set_size(&self, window: WindowHandle, size: Size) -> Result<()> {
        self.set_attribute(window, AttributeValue::Size(size))
    }

    fn set_position(&self, window: WindowHandle, position: Point) -> Result<()> {
        self.set_attribute(window, AttributeValue::Position(position))
    }
}

impl<T: Accessibility + ?Sized> WindowAttributes for T {}

/// Дисплей: полный фрейм и видимая область (без меню-бара и дока),
/// оба в нативных координатах с началом внизу слева
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Screen {
    pub frame: Rect,
    pub visible_frame: Rect,
}

/// Снимок конфигурации дисплеев
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Topology {
    /// Первый элемент: основной дисплей
    pub screens: Vec<Screen>,
    /// Индекс дисплея с фокусом пользователя
    pub active: Option<usize>,
}

impl Topology {
    pub fn single(screen: Screen) -> Self {
        Self {
            screens: vec![screen],
            active: Some(0),
        }
    }

    pub fn primary(&self) -> Option<&Screen> {
        self.screens.first()
    }

    pub fn active_screen(&self) -> Option<&Screen> {
        self.active.and_then(|index| self.screens.get(index))
    }

    pub fn resolve(&self, selector: ScreenSelector) -> Option<&Screen> {
        match selector {
            ScreenSelector::Primary => self.primary(),
            ScreenSelector::Active => self.active_screen(),
        }
    }

    /// Видимая область выбранного дисплея в координатах Accessibility API
    pub fn usable_area(&self, selector: ScreenSelector) -> Option<Rect> {
        let primary = self.primary()?;
        let target = self.resolve(selector)?;
        Some(target.visible_frame.to_accessibility(&primary.frame))
    }
}

/// Источник информации о дисплеях
pub trait ScreenTopology: Send + Sync {
    fn topology(&self) -> Topology;
}

/// Справочник запущенных приложений
pub trait AppDirectory: Send + Sync {
    fn running_app(&self, bundle_identifier: &str) -> Option<ProcessInfo>;
}
