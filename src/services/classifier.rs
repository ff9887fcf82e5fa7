//! Window classification: decides which new windows are "special" and must be
//! left alone (Quick Look panels, windows of mounted installer disk images).
//!
//! Any failed lookup classifies the window as regular, so an unreadable title
//! or an inaccessible volume never blocks the geometry change.

use crate::debug_if_enabled;
use crate::events::WindowHandle;
use crate::services::backend::{Accessibility, WindowAttributes};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Subrole панели быстрого просмотра
pub const QUICK_LOOK_SUBROLE: &str = "Quick Look";

/// Каталог, куда монтируются тома
pub const VOLUMES_ROOT: &str = "/Volumes";

/// Доступ к файловой системе, нужный для распознавания томов.
/// `None` означает, что узнать не удалось.
pub trait VolumeProbe: Send + Sync {
    fn is_directory(&self, path: &Path) -> bool;
    fn is_startup_volume(&self, path: &Path) -> Option<bool>;
    fn is_read_only(&self, path: &Path) -> Option<bool>;
}

/// Реальная файловая система
pub struct SystemVolumes;

impl VolumeProbe for SystemVolumes {
    fn is_directory(&self, path: &Path) -> bool {
        fs::metadata(path).map(|meta| meta.is_dir()).unwrap_or(false)
    }

    fn is_startup_volume(&self, path: &Path) -> Option<bool> {
        let root = fs::metadata("/").ok()?;
        let volume = fs::metadata(path).ok()?;
        Some(root.dev() == volume.dev())
    }

    fn is_read_only(&self, path: &Path) -> Option<bool> {
        let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path: валидная C-строка, stat: выделенная структура
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return None;
        }
        Some(stat.f_flag & libc::ST_RDONLY != 0)
    }
}

/// Вид окна с точки зрения политики
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Regular,
    QuickLook,
    DiskImage,
}

impl WindowKind {
    pub fn is_special(&self) -> bool {
        !matches!(self, WindowKind::Regular)
    }
}

pub struct WindowClassifier {
    volumes: Arc<dyn VolumeProbe>,
}

impl WindowClassifier {
    pub fn new(volumes: Arc<dyn VolumeProbe>) -> Self {
        Self { volumes }
    }

    pub fn classify<A: Accessibility + ?Sized>(&self, accessibility: &A, window: WindowHandle) -> WindowKind {
        if accessibility.subrole(window).as_deref() == Some(QUICK_LOOK_SUBROLE) {
            debug_if_enabled!("{}: панель Quick Look", window);
            return WindowKind::QuickLook;
        }

        let Some(title) = accessibility.title(window) else {
            debug_if_enabled!("{}: нет заголовка, считаем обычным окном", window);
            return WindowKind::Regular;
        };

        if self.is_disk_image_title(&title) {
            debug_if_enabled!("{}: окно образа диска '{}'", window, title);
            return WindowKind::DiskImage;
        }

        WindowKind::Regular
    }

    /// Заголовок совпадает с примонтированным read-only томом, который не
    /// является загрузочным
    pub fn is_disk_image_title(&self, title: &str) -> bool {
        let Some(path) = volume_path(title) else {
            return false;
        };

        if !self.volumes.is_directory(&path) {
            return false;
        }

        match self.volumes.is_startup_volume(&path) {
            Some(false) => {}
            Some(true) | None => return false,
        }

        self.volumes.is_read_only(&path).unwrap_or(false)
    }
}

/// `/Volumes/<title>`; заголовок с разделителями пути томом быть не может
fn volume_path(title: &str) -> Option<PathBuf> {
    if title.is_empty() || title == "." || title == ".." || title.contains('/') {
        return None;
    }
    Some(Path::new(VOLUMES_ROOT).join(title))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::Rect;
    use crate::services::backend::{DryRunDesktop, SimWindow};
    use std::collections::HashMap;

    /// Поддельные тома: путь → (загрузочный, read-only)
    #[derive(Default)]
    pub(crate) struct FakeVolumes {
        pub volumes: HashMap<PathBuf, (Option<bool>, Option<bool>)>,
    }

    impl FakeVolumes {
        pub(crate) fn with(mut self, name: &str, startup: Option<bool>, read_only: Option<bool>) -> Self {
            self.volumes
                .insert(Path::new(VOLUMES_ROOT).join(name), (startup, read_only));
            self
        }
    }

    impl VolumeProbe for FakeVolumes {
        fn is_directory(&self, path: &Path) -> bool {
            self.volumes.contains_key(path)
        }

        fn is_startup_volume(&self, path: &Path) -> Option<bool> {
            self.volumes.get(path).and_then(|(startup, _)| *startup)
        }

        fn is_read_only(&self, path: &Path) -> Option<bool> {
            self.volumes.get(path).and_then(|(_, read_only)| *read_only)
        }
    }

    fn classifier(volumes: FakeVolumes) -> WindowClassifier {
        WindowClassifier::new(Arc::new(volumes))
    }

    #[test]
    fn test_mounted_installer_is_disk_image() {
        let classifier = classifier(FakeVolumes::default().with("Install Foo", Some(false), Some(true)));
        assert!(classifier.is_disk_image_title("Install Foo"));
    }

    #[test]
    fn test_writable_or_startup_volume_is_regular() {
        let classifier = classifier(
            FakeVolumes::default()
                .with("Backup", Some(false), Some(false))
                .with("Macintosh HD", Some(true), Some(true)),
        );
        assert!(!classifier.is_disk_image_title("Backup"));
        assert!(!classifier.is_disk_image_title("Macintosh HD"));
        assert!(!classifier.is_disk_image_title("Documents"));
    }

    #[test]
    fn test_failed_lookups_fail_open() {
        let classifier = classifier(
            FakeVolumes::default()
                .with("Unknown Device", None, Some(true))
                .with("Flaky", Some(false), None),
        );
        assert!(!classifier.is_disk_image_title("Unknown Device"));
        assert!(!classifier.is_disk_image_title("Flaky"));
    }

    #[test]
    fn test_titles_with_path_separators_are_not_volumes() {
        let classifier = classifier(FakeVolumes::default().with("Install Foo", Some(false), Some(true)));
        assert!(!classifier.is_disk_image_title("../Volumes/Install Foo"));
        assert!(!classifier.is_disk_image_title(".."));
        assert!(!classifier.is_disk_image_title(""));
    }

    #[test]
    fn test_classify_reads_window_attributes() {
        let desktop = DryRunDesktop::new();
        let app = desktop.launch_app("com.apple.finder");
        let frame = Rect::new(0.0, 0.0, 800.0, 600.0);

        let regular = desktop.add_window(app.pid, SimWindow::standard("Documents", frame));
        let quick_look = desktop.add_window(app.pid, SimWindow::quick_look(frame));
        let installer = desktop.add_window(app.pid, SimWindow::standard("Install Foo", frame));
        let untitled = desktop.add_window(app.pid, SimWindow::untitled(frame));

        let classifier = classifier(FakeVolumes::default().with("Install Foo", Some(false), Some(true)));

        assert_eq!(classifier.classify(&desktop, regular), WindowKind::Regular);
        assert_eq!(classifier.classify(&desktop, quick_look), WindowKind::QuickLook);
        assert_eq!(classifier.classify(&desktop, installer), WindowKind::DiskImage);
        assert_eq!(classifier.classify(&desktop, untitled), WindowKind::Regular);
        assert!(WindowKind::DiskImage.is_special());
        assert!(!WindowKind::Regular.is_special());
    }
}
