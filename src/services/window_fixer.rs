use crate::config::{AnimationConfig, ConfigStore};
use crate::events::{WindowDiff, WindowHandle};
use crate::services::backend::{Accessibility, ScreenTopology, Topology, WindowAttributes};
use crate::services::classifier::WindowClassifier;
use crate::services::frame_animator::FrameAnimator;
use crate::services::geometry_policy::{self, FramePlan, PlanInput};
use std::sync::Arc;
use tracing::{debug, info};

/// Обработчик новых окон: классифицирует окно, спрашивает политику и
/// применяет результат напрямую или через аниматор.
pub struct WindowFixer {
    config: Arc<ConfigStore>,
    accessibility: Arc<dyn Accessibility>,
    screens: Arc<dyn ScreenTopology>,
    classifier: WindowClassifier,
    animator: Arc<FrameAnimator>,
}

impl WindowFixer {
    pub fn new(
        config: Arc<ConfigStore>,
        accessibility: Arc<dyn Accessibility>,
        screens: Arc<dyn ScreenTopology>,
        classifier: WindowClassifier,
        animator: Arc<FrameAnimator>,
    ) -> Self {
        Self {
            config,
            accessibility,
            screens,
            classifier,
            animator,
        }
    }

    /// Обрабатывает пачку новых окон. Возвращает решения политики по окнам
    /// в порядке перечисления ОС.
    pub fn handle_new_windows(&self, diff: &WindowDiff) -> Vec<(WindowHandle, FramePlan)> {
        // Один снапшот настроек и экранов на всю пачку
        let config = self.config.snapshot();
        let topology = if config.window.place {
            self.screens.topology()
        } else {
            Topology::default()
        };
        let first_window = self.has_no_valid_window(&diff.previous);

        let mut plans = Vec::with_capacity(diff.added.len());
        for &window in &diff.added {
            let input = PlanInput {
                kind: self.classifier.classify(self.accessibility.as_ref(), window),
                first_window,
                current_size: self.accessibility.size(window),
                topology: &topology,
            };
            let plan = geometry_policy::plan(&config.window, &input);
            debug!("{}: {:?} -> {:?}", window, input.kind, plan);

            self.execute(window, plan, &config.animation);
            plans.push((window, plan));
        }
        plans
    }

    /// Ни одного валидного окна до этого: пустой набор или у всех нет роли
    fn has_no_valid_window(&self, previous: &[WindowHandle]) -> bool {
        previous
            .iter()
            .all(|&window| self.accessibility.role(window).is_none())
    }

    fn execute(&self, window: WindowHandle, plan: FramePlan, animation: &AnimationConfig) {
        match plan {
            FramePlan::Unchanged => {}
            FramePlan::Resize(size) => {
                // Только размер: без анимации
                self.animator.cancel(window);
                match self.accessibility.set_size(window, size) {
                    Ok(()) => info!("{}: размер {}x{}", window, size.width, size.height),
                    Err(e) => debug!("{}: не удалось изменить размер: {}", window, e),
                }
            }
            FramePlan::Reframe(target) => {
                let start = self.accessibility.frame(window);
                if start == Some(target) {
                    // Окно уже на месте: незавершённая анимация не нужна
                    self.animator.cancel(window);
                    debug!("{}: уже на месте", window);
                    return;
                }

                match start {
                    Some(start) if animation.enabled => {
                        info!("{}: анимация {} -> {}", window, start, target);
                        self.animator.animate(window, start, target, animation.duration());
                    }
                    _ => {
                        info!("{}: фрейм {}", window, target);
                        self.animator.cancel(window);
                        self.animator.apply_immediately(window, &target);
                    }
                }
            }
        }
    }
}
