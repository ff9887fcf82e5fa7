//! macOS backend: Accessibility API (AXUIElement, AXObserver), AppKit
//! (NSScreen, NSRunningApplication) and CVDisplayLink.

mod accessibility;
mod display_link;
mod ffi;
mod workspace;

use super::Backend;
use crate::config::Config;
use crate::error::Result;
use crate::services::classifier::SystemVolumes;
use std::sync::Arc;
use tracing::info;

use self::accessibility::MacAccessibility;
use self::display_link::DisplayLinkClock;
use self::workspace::Workspace;

pub fn create(config: &Config) -> Result<Backend> {
    let workspace = Arc::new(Workspace);
    let backend = Backend {
        accessibility: Arc::new(MacAccessibility::new()?),
        screens: workspace.clone(),
        apps: workspace,
        clock: Arc::new(DisplayLinkClock::new(config.animation.fallback_fps)),
        volumes: Arc::new(SystemVolumes),
        desktop: None,
    };
    info!("Бэкенд macOS инициализирован");
    Ok(backend)
}
