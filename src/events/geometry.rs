use serde::{Deserialize, Serialize};
use std::fmt;

/// Точка (позиция окна или смещение)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Размер окна
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Прямоугольник: origin + size.
///
/// Система координат зависит от источника: экраны описываются в нативной
/// системе с началом в левом нижнем углу, окна: в системе Accessibility API
/// (левый верхний угол основного дисплея).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub const fn from_parts(origin: Point, size: Size) -> Self {
        Self { origin, size }
    }

    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    pub fn mid_x(&self) -> f64 {
        self.origin.x + self.size.width * 0.5
    }

    pub fn mid_y(&self) -> f64 {
        self.origin.y + self.size.height * 0.5
    }

    /// Переводит прямоугольник из экранных координат (начало внизу слева)
    /// в координаты Accessibility API (начало вверху слева).
    ///
    /// `primary_frame`: полный фрейм основного дисплея.
    pub fn to_accessibility(&self, primary_frame: &Rect) -> Rect {
        Rect::new(
            self.min_x(),
            primary_frame.max_y() - self.max_y(),
            self.size.width,
            self.size.height,
        )
    }

    /// Обратное преобразование. Формула та же: отражение относительно
    /// верхней границы основного дисплея является инволюцией.
    pub fn from_accessibility(&self, primary_frame: &Rect) -> Rect {
        self.to_accessibility(primary_frame)
    }

    /// Origin, при котором окно `size` окажется по центру прямоугольника
    pub fn center_point(&self, size: Size) -> Point {
        Point::new(
            self.mid_x() - size.width * 0.5,
            self.mid_y() - size.height * 0.5,
        )
    }

    /// Origin со смещением от левого верхнего угла прямоугольника
    pub fn offset_point(&self, offset: Point) -> Point {
        Point::new(self.min_x() + offset.x, self.min_y() + offset.y)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.1}, {:.1}, {:.1}x{:.1})",
            self.origin.x, self.origin.y, self.size.width, self.size.height
        )
    }
}
