use crate::debug_if_enabled;
use crate::error::{Result, SnapError};
use crate::events::{FrameUpdate, MainCommand, Rect, WindowHandle};
use crate::services::backend::{Accessibility, WindowAttributes};
use crate::services::frame_clock::{FrameClock, FrameTicks};
use crate::trace_if_enabled;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Состояние задачи анимации. Из терминальных состояний выхода нет.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl AnimationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnimationState::Completed | AnimationState::Cancelled)
    }

    pub fn transition(self, next: AnimationState) -> Result<AnimationState> {
        use AnimationState::*;
        match (self, next) {
            (Idle, Running) | (Running, Completed) | (Running, Cancelled) => Ok(next),
            // Без источника тиков фрейм применяется сразу
            (Idle, Completed) => Ok(next),
            (from, to) => Err(SnapError::InvalidTransition { from, to }),
        }
    }
}

/// Ease-out cubic: быстрое начало, плавное торможение
pub fn ease_out_cubic(t: f64) -> f64 {
    let t1 = t - 1.0;
    t1 * t1 * t1 + 1.0
}

/// Доля прошедшего времени, ограниченная сверху единицей
pub fn progress(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0)
}

/// Линейная интерполяция каждой компоненты фрейма
pub fn interpolate(start: &Rect, target: &Rect, t: f64) -> Rect {
    let lerp = |from: f64, to: f64| from + (to - from) * t;
    Rect::new(
        lerp(start.origin.x, target.origin.x),
        lerp(start.origin.y, target.origin.y),
        lerp(start.size.width, target.size.width),
        lerp(start.size.height, target.size.height),
    )
}

/// Записывает фрейм окна: размер, затем позиция. С `settle` размер
/// выставляется ещё раз, потому что смена позиции может заставить окно
/// ужать себя под экран.
///
/// Ошибки не прерывают последовательность; возвращает `true`, если все
/// записи прошли.
pub fn write_frame<A: Accessibility + ?Sized>(accessibility: &A, window: WindowHandle, frame: &Rect, settle: bool) -> bool {
    let mut ok = true;

    if let Err(e) = accessibility.set_size(window, frame.size) {
        debug!("{}: не удалось выставить размер: {}", window, e);
        ok = false;
    }
    if let Err(e) = accessibility.set_position(window, frame.origin) {
        debug!("{}: не удалось выставить позицию: {}", window, e);
        ok = false;
    }
    if settle {
        if let Err(e) = accessibility.set_size(window, frame.size) {
            debug!("{}: не удалось повторно выставить размер: {}", window, e);
            ok = false;
        }
    }

    ok
}

/// Активная анимация одного окна
#[derive(Debug)]
struct AnimationTask {
    generation: u64,
    state: AnimationState,
    target: Rect,
    handle: Option<JoinHandle<()>>,
}

impl AnimationTask {
    fn finish(mut self, window: WindowHandle, next: AnimationState) {
        match self.state.transition(next) {
            Ok(state) => {
                self.state = state;
                debug_if_enabled!(
                    "{}: анимация #{} -> {:?} (цель {})",
                    window,
                    self.generation,
                    self.state,
                    self.target
                );
            }
            Err(e) => warn!("{}: {}", window, e),
        }

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Аниматор фреймов окон.
///
/// Держит реестр `окно → активная задача`: новая анимация того же окна
/// отменяет предыдущую, завершённые задачи удаляются из реестра. Тики
/// приходят в отдельную tokio-задачу, а сами записи атрибутов выполняет
/// главный цикл через `apply_update`.
pub struct FrameAnimator {
    accessibility: Arc<dyn Accessibility>,
    clock: Arc<dyn FrameClock>,
    main_tx: UnboundedSender<MainCommand>,
    tasks: DashMap<WindowHandle, AnimationTask>,
    next_generation: AtomicU64,
}

impl FrameAnimator {
    pub fn new(
        accessibility: Arc<dyn Accessibility>,
        clock: Arc<dyn FrameClock>,
        main_tx: UnboundedSender<MainCommand>,
    ) -> Self {
        Self {
            accessibility,
            clock,
            main_tx,
            tasks: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Запускает анимацию окна от `start` к `target`.
    ///
    /// Возвращает `Running`, либо `Completed`, если источника тиков нет и
    /// фрейм применён сразу.
    pub fn animate(&self, window: WindowHandle, start: Rect, target: Rect, duration: Duration) -> AnimationState {
        if self.cancel(window) {
            info!("{}: предыдущая анимация отменена новой", window);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let runtime = tokio::runtime::Handle::try_current();
        let ticks = match (runtime, self.clock.start()) {
            (Ok(runtime), Some(ticks)) => Some((runtime, ticks)),
            _ => None,
        };
        let Some((runtime, ticks)) = ticks else {
            warn!("{}: источник тиков недоступен, применяем фрейм без анимации", window);
            self.apply_immediately(window, &target);
            return AnimationState::Completed;
        };

        let state = match AnimationState::Idle.transition(AnimationState::Running) {
            Ok(state) => state,
            Err(e) => {
                warn!("{}: {}", window, e);
                return AnimationState::Idle;
            }
        };

        debug!("{}: анимация #{} {} -> {} за {:?}", window, generation, start, target, duration);

        let started = Instant::now();
        self.tasks.insert(
            window,
            AnimationTask {
                generation,
                state,
                target,
                handle: None,
            },
        );

        let handle = runtime.spawn(Self::animation_task(
            window,
            generation,
            start,
            target,
            duration,
            started,
            ticks,
            self.main_tx.clone(),
        ));

        match self.tasks.get_mut(&window) {
            Some(mut task) if task.generation == generation => task.handle = Some(handle),
            _ => handle.abort(),
        }

        state
    }

    /// Применяет кадр из главного цикла. Кадры отменённых или заменённых
    /// задач отбрасываются.
    pub fn apply_update(&self, update: FrameUpdate) {
        let current = self.tasks.get(&update.window).map(|task| task.generation);
        if current != Some(update.generation) {
            trace_if_enabled!(
                "{}: кадр устаревшей анимации #{} отброшен",
                update.window,
                update.generation
            );
            return;
        }

        trace_if_enabled!(
            "{}: кадр #{} {} (в очереди {:?})",
            update.window,
            update.generation,
            update.frame,
            update.timestamp.elapsed()
        );

        if !update.is_final {
            write_frame(self.accessibility.as_ref(), update.window, &update.frame, false);
            return;
        }

        // Финальный кадр: ровно целевой фрейм, без накопленной погрешности
        write_frame(self.accessibility.as_ref(), update.window, &update.frame, true);
        if let Some((window, task)) = self
            .tasks
            .remove_if(&update.window, |_, task| task.generation == update.generation)
        {
            task.finish(window, AnimationState::Completed);
        }
    }

    /// Ставит фрейм сразу: размер, позиция, снова размер
    pub fn apply_immediately(&self, window: WindowHandle, target: &Rect) {
        if !write_frame(self.accessibility.as_ref(), window, target, true) {
            debug!("{}: фрейм {} применён не полностью", window, target);
        }
    }

    /// Отменяет анимацию окна; `true`, если она была
    pub fn cancel(&self, window: WindowHandle) -> bool {
        match self.tasks.remove(&window) {
            Some((window, task)) => {
                task.finish(window, AnimationState::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let windows: Vec<WindowHandle> = self.tasks.iter().map(|entry| *entry.key()).collect();
        if !windows.is_empty() {
            info!("Остановка {} активных анимаций", windows.len());
        }
        for window in windows {
            self.cancel(window);
        }
    }

    pub fn is_animating(&self, window: WindowHandle) -> bool {
        self.tasks.contains_key(&window)
    }

    #[allow(dead_code)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Тело задачи: на каждом тике считает кадр и передаёт его в главный цикл
    #[allow(clippy::too_many_arguments)]
    async fn animation_task(
        window: WindowHandle,
        generation: u64,
        start: Rect,
        target: Rect,
        duration: Duration,
        started: Instant,
        mut ticks: FrameTicks,
        main_tx: UnboundedSender<MainCommand>,
    ) {
        let mut frames = 0u32;
        loop {
            let ticked = ticks.next().await;
            let progress = if ticked {
                progress(started.elapsed(), duration)
            } else {
                // Источник остановился: сразу к последнему кадру
                1.0
            };

            let is_final = progress >= 1.0;
            let frame = if is_final {
                target
            } else {
                interpolate(&start, &target, ease_out_cubic(progress))
            };

            frames += 1;
            let update = FrameUpdate::new(window, generation, frame, is_final);
            if main_tx.send(MainCommand::ApplyFrame(update)).is_err() || is_final {
                break;
            }
        }

        trace_if_enabled!("{}: задача анимации #{} отправила {} кадров", window, generation, frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Point, Size};
    use crate::services::backend::{AttributeValue, DryRunDesktop, SimWindow};
    use crate::services::frame_clock::IntervalClock;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    struct UnavailableClock;

    impl FrameClock for UnavailableClock {
        fn start(&self) -> Option<FrameTicks> {
            None
        }
    }

    fn setup(clock: Arc<dyn FrameClock>) -> (Arc<DryRunDesktop>, FrameAnimator, UnboundedReceiver<MainCommand>, WindowHandle) {
        let desktop = Arc::new(DryRunDesktop::new());
        let app = desktop.launch_app("com.apple.finder");
        let window = desktop.add_window(app.pid, SimWindow::standard("Recents", Rect::new(0.0, 0.0, 800.0, 600.0)));
        let (tx, rx) = unbounded_channel();
        let animator = FrameAnimator::new(desktop.clone(), clock, tx);
        (desktop, animator, rx, window)
    }

    /// Минимальный главный цикл: применяет кадры, пока есть анимации
    async fn drain(animator: &FrameAnimator, rx: &mut UnboundedReceiver<MainCommand>) {
        while animator.active_count() > 0 {
            match rx.recv().await {
                Some(MainCommand::ApplyFrame(update)) => animator.apply_update(update),
                Some(_) => {}
                None => break,
            }
        }
    }

    #[test]
    fn test_ease_out_cubic_boundaries() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
        assert_eq!(ease_out_cubic(0.5), 0.875);

        let mut previous = 0.0;
        for step in 1..=20 {
            let value = ease_out_cubic(step as f64 / 20.0);
            assert!(value > previous);
            previous = value;
        }
    }

    #[test]
    fn test_interpolation_boundaries() {
        let start = Rect::new(10.0, 20.0, 800.0, 600.0);
        let target = Rect::new(220.0, 100.0, 1000.0, 700.0);

        assert_eq!(interpolate(&start, &target, 0.0), start);
        assert_eq!(
            interpolate(&start, &target, 0.5),
            Rect::new(115.0, 60.0, 900.0, 650.0)
        );
        let end = interpolate(&start, &target, ease_out_cubic(1.0));
        assert!((end.origin.x - target.origin.x).abs() < 1e-9);
        assert!((end.size.height - target.size.height).abs() < 1e-9);
    }

    #[test]
    fn test_progress_is_clamped() {
        let duration = Duration::from_millis(250);
        assert_eq!(progress(Duration::ZERO, duration), 0.0);
        assert_eq!(progress(Duration::from_millis(125), duration), 0.5);
        assert_eq!(progress(Duration::from_secs(3), duration), 1.0);
        assert_eq!(progress(Duration::from_millis(1), Duration::ZERO), 1.0);
    }

    #[test]
    fn test_state_machine_has_no_reentry() {
        use AnimationState::*;
        assert_eq!(Idle.transition(Running).ok(), Some(Running));
        assert_eq!(Running.transition(Completed).ok(), Some(Completed));
        assert_eq!(Running.transition(Cancelled).ok(), Some(Cancelled));
        assert!(Completed.transition(Running).is_err());
        assert!(Cancelled.transition(Running).is_err());
        assert!(Cancelled.transition(Completed).is_err());
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
        assert!(!Running.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_animation_ends_exactly_on_target() {
        let (desktop, animator, mut rx, window) = setup(Arc::new(IntervalClock::new(60)));
        let start = desktop.window_frame(window).expect("frame");
        let target = Rect::new(220.0, 100.0, 1000.0, 700.0);

        let state = animator.animate(window, start, target, Duration::from_millis(250));
        assert_eq!(state, AnimationState::Running);
        assert!(animator.is_animating(window));

        drain(&animator, &mut rx).await;

        assert!(!animator.is_animating(window));
        assert_eq!(desktop.window_frame(window), Some(target));

        // Промежуточные кадры были, и каждый начинается с размера
        let writes = desktop.writes();
        assert!(writes.len() > 3);
        assert!(matches!(writes[0].value, AttributeValue::Size(_)));
        assert!(matches!(writes[1].value, AttributeValue::Position(_)));
        // Финальный кадр: размер, позиция, размер
        let tail: Vec<_> = writes[writes.len() - 3..].iter().map(|w| w.value.clone()).collect();
        assert_eq!(
            tail,
            vec![
                AttributeValue::Size(target.size),
                AttributeValue::Position(target.origin),
                AttributeValue::Size(target.size),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_animation_supersedes_running_one() {
        let (desktop, animator, mut rx, window) = setup(Arc::new(IntervalClock::new(60)));
        let start = desktop.window_frame(window).expect("frame");
        let first_target = Rect::new(0.0, 0.0, 1400.0, 850.0);
        let second_target = Rect::new(220.0, 100.0, 1000.0, 700.0);

        animator.animate(window, start, first_target, Duration::from_millis(250));

        // Пару кадров первой анимации применяем
        for _ in 0..2 {
            if let Some(MainCommand::ApplyFrame(update)) = rx.recv().await {
                animator.apply_update(update);
            }
        }

        let current = desktop.window_frame(window).expect("frame");
        animator.animate(window, current, second_target, Duration::from_millis(250));
        assert_eq!(animator.active_count(), 1);

        drain(&animator, &mut rx).await;
        assert_eq!(desktop.window_frame(window), Some(second_target));
        assert!(!desktop
            .writes()
            .iter()
            .any(|w| w.value == AttributeValue::Size(first_target.size)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_frames_are_ignored() {
        let (desktop, animator, _rx, window) = setup(Arc::new(IntervalClock::new(60)));
        let start = desktop.window_frame(window).expect("frame");

        animator.animate(window, start, Rect::new(1.0, 1.0, 2.0, 2.0), Duration::from_secs(1));
        animator.animate(window, start, Rect::new(5.0, 5.0, 6.0, 6.0), Duration::from_secs(1));
        desktop.clear_writes();

        // Кадр первой задачи (поколение 1) пришёл после замены
        animator.apply_update(FrameUpdate::new(window, 1, Rect::new(1.0, 1.0, 2.0, 2.0), true));
        assert!(desktop.writes().is_empty());
        assert!(animator.is_animating(window));

        animator.cancel_all();
        assert!(!animator.is_animating(window));
    }

    #[tokio::test]
    async fn test_missing_clock_applies_target_immediately() {
        let (desktop, animator, _rx, window) = setup(Arc::new(UnavailableClock));
        let target = Rect::from_parts(Point::new(50.0, 60.0), Size::new(900.0, 650.0));

        let state = animator.animate(window, Rect::default(), target, Duration::from_millis(250));

        assert_eq!(state, AnimationState::Completed);
        assert!(!animator.is_animating(window));
        assert_eq!(desktop.window_frame(window), Some(target));
        assert_eq!(desktop.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_write_frame_keeps_going_after_failures() {
        let (desktop, _animator, _rx, window) = setup(Arc::new(UnavailableClock));
        desktop.close_window(window);
        assert!(!write_frame(desktop.as_ref(), window, &Rect::default(), true));
    }
}
