use super::ffi::*;
use crate::services::frame_clock::{send_tick, tick_channel, FrameClock, FrameTicks, IntervalClock};
use std::ffi::c_void;
use std::ptr;
use tokio::sync::mpsc;
use tracing::debug;

unsafe extern "C" fn display_link_callback(
    _display_link: CVDisplayLinkRef,
    _in_now: *const CVTimeStamp,
    _in_output_time: *const CVTimeStamp,
    _flags_in: CVOptionFlags,
    _flags_out: *mut CVOptionFlags,
    context: *mut c_void,
) -> CVReturn {
    // SAFETY: context: Sender из DisplayLink::start, живёт до CVDisplayLinkStop
    let tx = unsafe { &*(context as *const mpsc::Sender<()>) };
    send_tick(tx);
    0
}

/// CVDisplayLink главного дисплея, который шлёт тик на каждый vsync
struct DisplayLink {
    link: CVDisplayLinkRef,
    context: *mut mpsc::Sender<()>,
}

// SAFETY: CVDisplayLink потокобезопасен, context читается только колбэком
unsafe impl Send for DisplayLink {}

impl DisplayLink {
    fn start(tx: mpsc::Sender<()>) -> Option<Self> {
        let context = Box::into_raw(Box::new(tx));
        let mut link: CVDisplayLinkRef = ptr::null_mut();

        unsafe {
            if CVDisplayLinkCreateWithCGDisplay(CGMainDisplayID(), &mut link) != 0 || link.is_null() {
                drop(Box::from_raw(context));
                return None;
            }
            if CVDisplayLinkSetOutputCallback(link, display_link_callback, context.cast::<c_void>()) != 0
                || CVDisplayLinkStart(link) != 0
            {
                CVDisplayLinkRelease(link);
                drop(Box::from_raw(context));
                return None;
            }
        }

        Some(Self { link, context })
    }
}

impl Drop for DisplayLink {
    fn drop(&mut self) {
        unsafe {
            CVDisplayLinkStop(self.link);
            CVDisplayLinkRelease(self.link);
            drop(Box::from_raw(self.context));
        }
    }
}

/// Тики от CVDisplayLink; если его создать нельзя: таймер tokio
pub struct DisplayLinkClock {
    fallback: IntervalClock,
}

impl DisplayLinkClock {
    pub fn new(fallback_fps: u32) -> Self {
        Self {
            fallback: IntervalClock::new(fallback_fps),
        }
    }
}

impl FrameClock for DisplayLinkClock {
    fn start(&self) -> Option<FrameTicks> {
        let (tx, rx) = tick_channel();
        match DisplayLink::start(tx) {
            Some(link) => Some(FrameTicks::new(rx, link)),
            None => {
                debug!("CVDisplayLink недоступен, используем таймер");
                self.fallback.start()
            }
        }
    }
}
