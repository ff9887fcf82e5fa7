use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Идентификатор процесса
pub type Pid = i32;

/// Непрозрачная ссылка на живое окно целевого приложения.
///
/// Выдаётся бэкендом; два хэндла равны тогда и только тогда, когда бэкенд
/// считает их одним и тем же окном ОС.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(u64);

impl WindowHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Все top-level окна приложения в некоторый момент времени
pub type WindowSet = Vec<WindowHandle>;

/// Информация о запущенном процессе
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub bundle_identifier: Option<String>,
}

impl ProcessInfo {
    pub fn new(pid: Pid, bundle_identifier: impl Into<String>) -> Self {
        Self {
            pid,
            bundle_identifier: Some(bundle_identifier.into()),
        }
    }

    pub fn matches(&self, bundle_identifier: &str) -> bool {
        self.bundle_identifier.as_deref() == Some(bundle_identifier)
    }
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bundle_identifier {
            Some(id) => write!(f, "{} (pid {})", id, self.pid),
            None => write!(f, "pid {}", self.pid),
        }
    }
}

/// Изменение набора окон, переданное обработчику монитора
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDiff {
    pub added: SmallVec<[WindowHandle; 4]>,
    pub current: WindowSet,
    pub previous: WindowSet,
}

impl WindowDiff {
    /// `None`, если новых окон нет
    pub fn between(current: WindowSet, previous: WindowSet) -> Option<Self> {
        let added = added_windows(&current, &previous);
        if added.is_empty() {
            return None;
        }
        Some(Self {
            added,
            current,
            previous,
        })
    }
}

/// Разность множеств `current − previous` по идентичности хэндлов.
/// Порядок результата совпадает с порядком `current`.
pub fn added_windows(current: &[WindowHandle], previous: &[WindowHandle]) -> SmallVec<[WindowHandle; 4]> {
    current
        .iter()
        .filter(|window| !previous.contains(window))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(raw: &[u64]) -> WindowSet {
        raw.iter().copied().map(WindowHandle::new).collect()
    }

    #[test]
    fn test_added_windows_is_set_difference() {
        let previous = handles(&[1, 2]);
        let current = handles(&[2, 3, 1, 4]);

        let added = added_windows(&current, &previous);
        assert_eq!(added.as_slice(), handles(&[3, 4]).as_slice());
    }

    #[test]
    fn test_added_windows_empty_iff_sets_equal() {
        let a = handles(&[5, 6, 7]);
        let same_in_other_order = handles(&[7, 5, 6]);
        assert!(added_windows(&same_in_other_order, &a).is_empty());
        assert!(WindowDiff::between(same_in_other_order, a.clone()).is_none());

        let superset = handles(&[5, 6, 7, 8]);
        assert!(!added_windows(&superset, &a).is_empty());
    }

    #[test]
    fn test_window_diff_keeps_both_sets() {
        let diff = WindowDiff::between(handles(&[1, 2]), handles(&[1])).expect("diff");
        assert_eq!(diff.added.as_slice(), &[WindowHandle::new(2)]);
        assert_eq!(diff.current, handles(&[1, 2]));
        assert_eq!(diff.previous, handles(&[1]));
    }

    #[test]
    fn test_process_info_matching() {
        let finder = ProcessInfo::new(412, "com.apple.finder");
        assert!(finder.matches("com.apple.finder"));
        assert!(!finder.matches("com.apple.Safari"));

        let anonymous = ProcessInfo {
            pid: 1,
            bundle_identifier: None,
        };
        assert!(!anonymous.matches("com.apple.finder"));
        assert_eq!(anonymous.to_string(), "pid 1");
    }
}
