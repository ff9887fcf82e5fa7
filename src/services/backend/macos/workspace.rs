use crate::events::{Point, ProcessInfo, Rect, Size};
use crate::services::backend::{AppDirectory, Screen, ScreenTopology, Topology};
use objc2::msg_send;
use objc2::rc::autoreleasepool;
use objc2::runtime::{AnyClass, AnyObject};
use objc2_foundation::{NSRect, NSString};
use tracing::debug;

fn to_rect(rect: NSRect) -> Rect {
    Rect::from_parts(
        Point::new(rect.origin.x, rect.origin.y),
        Size::new(rect.size.width, rect.size.height),
    )
}

/// Дисплеи (NSScreen) и запущенные приложения (NSRunningApplication)
pub struct Workspace;

impl Workspace {
    fn read_topology() -> Option<Topology> {
        let class = AnyClass::get(c"NSScreen")?;
        let screens: *mut AnyObject = unsafe { msg_send![class, screens] };
        if screens.is_null() {
            return None;
        }
        let main: *mut AnyObject = unsafe { msg_send![class, mainScreen] };
        let count: usize = unsafe { msg_send![screens, count] };

        let mut topology = Topology::default();
        for index in 0..count {
            let screen: *mut AnyObject = unsafe { msg_send![screens, objectAtIndex: index] };
            if screen.is_null() {
                continue;
            }
            let frame: NSRect = unsafe { msg_send![screen, frame] };
            let visible: NSRect = unsafe { msg_send![screen, visibleFrame] };
            if screen == main {
                topology.active = Some(topology.screens.len());
            }
            topology.screens.push(Screen {
                frame: to_rect(frame),
                visible_frame: to_rect(visible),
            });
        }
        Some(topology)
    }

    fn find_running(bundle_identifier: &str) -> Option<ProcessInfo> {
        let class = AnyClass::get(c"NSRunningApplication")?;
        let identifier = NSString::from_str(bundle_identifier);
        let apps: *mut AnyObject =
            unsafe { msg_send![class, runningApplicationsWithBundleIdentifier: &*identifier] };
        if apps.is_null() {
            return None;
        }

        let count: usize = unsafe { msg_send![apps, count] };
        (0..count).find_map(|index| {
            let app: *mut AnyObject = unsafe { msg_send![apps, objectAtIndex: index] };
            if app.is_null() {
                return None;
            }
            let terminated: bool = unsafe { msg_send![app, isTerminated] };
            let pid: libc::pid_t = unsafe { msg_send![app, processIdentifier] };
            // isTerminated обновляется только через главный run loop
            (!terminated && pid > 0 && process_alive(pid)).then(|| ProcessInfo::new(pid, bundle_identifier))
        })
    }
}

fn process_alive(pid: libc::pid_t) -> bool {
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

impl ScreenTopology for Workspace {
    fn topology(&self) -> Topology {
        autoreleasepool(|_| Self::read_topology()).unwrap_or_else(|| {
            debug!("NSScreen недоступен");
            Topology::default()
        })
    }
}

impl AppDirectory for Workspace {
    fn running_app(&self, bundle_identifier: &str) -> Option<ProcessInfo> {
        autoreleasepool(|_| Self::find_running(bundle_identifier))
    }
}
