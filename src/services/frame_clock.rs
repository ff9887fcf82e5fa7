use std::any::Any;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Поток тиков, синхронизированных с обновлением дисплея.
///
/// Источник тиков живёт, пока жив `FrameTicks`: drop останавливает и
/// освобождает колбэк.
pub struct FrameTicks {
    rx: mpsc::Receiver<()>,
    _source: Box<dyn Any + Send>,
}

impl FrameTicks {
    pub fn new(rx: mpsc::Receiver<()>, source: impl Any + Send) -> Self {
        Self {
            rx,
            _source: Box::new(source),
        }
    }

    /// Ждёт следующий тик; `false`, если источник остановился
    pub async fn next(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Канал тиков с ёмкостью 1: пропущенные под нагрузкой кадры отбрасываются,
/// анимация просто перескакивает вперёд по времени
pub fn tick_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

/// Неблокирующая отправка тика из потока таймера. `false`: получатель закрыт.
pub fn send_tick(tx: &mpsc::Sender<()>) -> bool {
    match tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => true,
        Err(TrySendError::Closed(())) => false,
    }
}

/// Источник периодического колбэка для аниматора
pub trait FrameClock: Send + Sync {
    /// `None`, если создать источник не удалось
    fn start(&self) -> Option<FrameTicks>;
}

/// Таймер на tokio interval: используется там, где нет display link
pub struct IntervalClock {
    period: Duration,
}

impl IntervalClock {
    pub fn new(fps: u32) -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl FrameClock for IntervalClock {
    fn start(&self) -> Option<FrameTicks> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = tick_channel();
        let period = self.period;

        let task = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !send_tick(&tx) {
                    break;
                }
            }
        });

        Some(FrameTicks::new(rx, AbortOnDrop(task)))
    }
}
