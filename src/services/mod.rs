pub mod app_watcher;
pub mod backend;
pub mod classifier;
pub mod frame_animator;
pub mod frame_clock;
pub mod geometry_policy;
pub mod main_loop;
pub mod window_fixer;
pub mod window_monitor;

pub use app_watcher::AppWatcher;
pub use backend::create_backend;
pub use main_loop::MainLoop;

use crate::error::Result;

/// Долгоживущий сервис, который запускается отдельной задачей tokio
#[async_trait::async_trait]
pub trait BackgroundService {
    async fn run(self: Box<Self>) -> Result<()>;
}
