//! Geometry policy: maps a configuration snapshot, a window classification and
//! the screen topology to the frame a new window should get.
//!
//! Everything here is a pure function of its inputs; the same inputs always
//! produce the same plan.

use crate::config::{Placement, WindowConfig};
use crate::events::{Point, Rect, Size};
use crate::services::backend::Topology;
use crate::services::classifier::WindowKind;

/// Что сделать с окном
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePlan {
    /// Ничего не менять
    Unchanged,
    /// Только размер, позиция остаётся прежней
    Resize(Size),
    /// Размер и позиция (координаты Accessibility API)
    Reframe(Rect),
}

/// Входные данные политики для одного окна
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub kind: WindowKind,
    /// У приложения до этого не было ни одного валидного окна
    pub first_window: bool,
    pub current_size: Option<Size>,
    pub topology: &'a Topology,
}

/// Позицию меняем, только если включено размещение и окно первое
/// (либо ограничение "только первое окно" выключено)
pub fn should_change_position(config: &WindowConfig, first_window: bool) -> bool {
    config.place && (!config.first_window_only || first_window)
}

/// Origin окна размера `size` на выбранном экране
pub fn target_origin(config: &WindowConfig, topology: &Topology, size: Size) -> Option<Point> {
    let usable = topology.usable_area(config.screen)?;
    Some(match config.placement {
        Placement::Center => usable.center_point(size),
        Placement::Custom => usable.offset_point(config.offset),
    })
}

pub fn plan(config: &WindowConfig, input: &PlanInput<'_>) -> FramePlan {
    if input.kind.is_special() {
        return FramePlan::Unchanged;
    }

    let change_position = should_change_position(config, input.first_window);
    if !change_position && !config.resize {
        return FramePlan::Unchanged;
    }

    let size = if config.resize {
        config.size
    } else {
        match input.current_size {
            Some(size) => size,
            None => return FramePlan::Unchanged,
        }
    };

    if change_position {
        if let Some(origin) = target_origin(config, input.topology, size) {
            return FramePlan::Reframe(Rect::from_parts(origin, size));
        }
    }

    if config.resize {
        FramePlan::Resize(size)
    } else {
        FramePlan::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ScreenSelector};
    use crate::services::backend::Screen;

    fn full_hd_topology() -> Topology {
        Topology::single(Screen {
            frame: Rect::new(0.0, 0.0, 1440.0, 900.0),
            visible_frame: Rect::new(0.0, 0.0, 1440.0, 900.0),
        })
    }

    fn window_config() -> WindowConfig {
        Config::default().window
    }

    fn input(topology: &Topology) -> PlanInput<'_> {
        PlanInput {
            kind: WindowKind::Regular,
            first_window: true,
            current_size: Some(Size::new(800.0, 600.0)),
            topology,
        }
    }

    #[test]
    fn test_resize_only_keeps_position() {
        let topology = full_hd_topology();
        let mut config = window_config();
        config.resize = true;
        config.size = Size::new(1200.0, 800.0);
        config.place = false;

        assert_eq!(plan(&config, &input(&topology)), FramePlan::Resize(Size::new(1200.0, 800.0)));
    }

    #[test]
    fn test_center_on_primary_screen() {
        let topology = full_hd_topology();
        let mut config = window_config();
        config.resize = true;
        config.size = Size::new(1000.0, 700.0);
        config.place = true;
        config.placement = Placement::Center;

        assert_eq!(
            plan(&config, &input(&topology)),
            FramePlan::Reframe(Rect::new(220.0, 100.0, 1000.0, 700.0))
        );
    }

    #[test]
    fn test_custom_offset_is_relative_to_usable_area() {
        let topology = Topology::single(Screen {
            frame: Rect::new(0.0, 0.0, 1440.0, 900.0),
            visible_frame: Rect::new(0.0, 70.0, 1440.0, 805.0),
        });
        let mut config = window_config();
        config.place = true;
        config.placement = Placement::Custom;
        config.offset = Point::new(40.0, 60.0);

        // Размер берётся текущий, так как resize выключен
        assert_eq!(
            plan(&config, &input(&topology)),
            FramePlan::Reframe(Rect::new(40.0, 85.0, 800.0, 600.0))
        );
    }

    #[test]
    fn test_first_window_only_blocks_position_for_later_windows() {
        let topology = full_hd_topology();
        let mut config = window_config();
        config.place = true;
        config.first_window_only = true;
        config.resize = true;
        config.size = Size::new(1000.0, 700.0);

        let mut later = input(&topology);
        later.first_window = false;
        assert_eq!(plan(&config, &later), FramePlan::Resize(Size::new(1000.0, 700.0)));

        config.resize = false;
        assert_eq!(plan(&config, &later), FramePlan::Unchanged);

        assert!(should_change_position(&config, true));
        assert!(!should_change_position(&config, false));
    }

    #[test]
    fn test_special_windows_are_never_changed() {
        let topology = full_hd_topology();
        let mut config = window_config();
        config.resize = true;
        config.place = true;

        for kind in [WindowKind::QuickLook, WindowKind::DiskImage] {
            let mut special = input(&topology);
            special.kind = kind;
            assert_eq!(plan(&config, &special), FramePlan::Unchanged);
        }
    }

    #[test]
    fn test_missing_screen_falls_back_to_resize() {
        let topology = full_hd_topology();
        let mut config = window_config();
        config.place = true;
        config.screen = ScreenSelector::Active;
        config.resize = true;

        let mut no_active = topology.clone();
        no_active.active = None;
        assert_eq!(plan(&config, &input(&no_active)), FramePlan::Resize(config.size));

        config.resize = false;
        assert_eq!(plan(&config, &input(&no_active)), FramePlan::Unchanged);
    }

    #[test]
    fn test_unknown_current_size_without_resize_is_noop() {
        let topology = full_hd_topology();
        let mut config = window_config();
        config.place = true;

        let mut unknown = input(&topology);
        unknown.current_size = None;
        assert_eq!(plan(&config, &unknown), FramePlan::Unchanged);
    }

    #[test]
    fn test_disabled_config_is_noop_and_plan_is_idempotent() {
        let topology = full_hd_topology();
        assert_eq!(plan(&window_config(), &input(&topology)), FramePlan::Unchanged);

        let mut config = window_config();
        config.place = true;
        config.resize = true;
        let first = plan(&config, &input(&topology));
        let second = plan(&config, &input(&topology));
        assert_eq!(first, second);
    }
}
