//! Platform backend: responsibility and boundaries
//!
//! Everything the daemon needs from the operating system lives behind the
//! traits in this module: window attributes and notifications, display
//! geometry, running applications, the per-frame clock and the volume probe.
//! Services above this layer never talk to the OS directly.

mod dry_run;
#[cfg(target_os = "macos")]
mod macos;
mod r#trait;

pub use self::dry_run::{DryRunDesktop, DryRunScenario, SimWindow};
pub use self::r#trait::{
    Accessibility, AppDirectory, AttributeValue, AxNotification, EventSink, Screen, ScreenTopology,
    Topology, WindowAttributes,
};

use crate::config::Config;
use crate::error::Result;
use crate::services::classifier::VolumeProbe;
use crate::services::frame_clock::{FrameClock, IntervalClock};
use std::sync::Arc;
use tracing::info;

/// Набор реализаций бэкенда, которыми пользуются сервисы
pub struct Backend {
    pub accessibility: Arc<dyn Accessibility>,
    pub screens: Arc<dyn ScreenTopology>,
    pub apps: Arc<dyn AppDirectory>,
    pub clock: Arc<dyn FrameClock>,
    pub volumes: Arc<dyn VolumeProbe>,
    /// Симулированный рабочий стол в режиме `--dry-run`
    pub desktop: Option<Arc<DryRunDesktop>>,
}

impl Backend {
    /// Бэкенд поверх симулированного рабочего стола
    pub fn simulated(desktop: Arc<DryRunDesktop>, fps: u32) -> Self {
        Self {
            accessibility: desktop.clone(),
            screens: desktop.clone(),
            apps: desktop.clone(),
            clock: Arc::new(IntervalClock::new(fps)),
            volumes: desktop.clone(),
            desktop: Some(desktop),
        }
    }
}

/// Factory function to create the backend based on the dry_run flag
pub fn create_backend(config: &Config, dry_run: bool) -> Result<Backend> {
    if dry_run {
        info!("Используется симулированный рабочий стол");
        return Ok(Backend::simulated(
            Arc::new(DryRunDesktop::new()),
            config.animation.fallback_fps,
        ));
    }

    create_platform_backend(config)
}

#[cfg(target_os = "macos")]
fn create_platform_backend(config: &Config) -> Result<Backend> {
    macos::create(config)
}

#[cfg(not(target_os = "macos"))]
fn create_platform_backend(_config: &Config) -> Result<Backend> {
    Err(crate::snap_error!(
        service_unavailable,
        "Accessibility API доступен только в macOS, используйте --dry-run"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_backend_shares_one_desktop() {
        let backend = create_backend(&Config::default(), true).expect("dry-run backend");
        let desktop = backend.desktop.clone().expect("desktop");

        let app = desktop.launch_app("com.apple.finder");
        assert_eq!(backend.apps.running_app("com.apple.finder"), Some(app));
        assert!(backend.accessibility.is_trusted());
        assert!(backend.screens.topology().primary().is_some());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_real_backend_is_unavailable_off_macos() {
        let result = create_backend(&Config::default(), false);
        assert!(matches!(result, Err(crate::error::SnapError::ServiceUnavailable(_))));
    }
}
