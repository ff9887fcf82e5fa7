use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::events::{Point, Size};

/// Bundle identifier приложения по умолчанию
pub const DEFAULT_BUNDLE_IDENTIFIER: &str = "com.apple.finder";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub target: TargetConfig,
    pub window: WindowConfig,
    pub animation: AnimationConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetConfig {
    pub bundle_identifier: String,
    pub poll_interval_ms: u64,
}

/// Где размещать новое окно
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Center,
    Custom,
}

/// На каком экране размещать новое окно
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenSelector {
    /// Основной дисплей (с меню-баром)
    Primary,
    /// Дисплей, на котором сейчас фокус пользователя
    Active,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WindowConfig {
    pub resize: bool,
    pub size: Size,
    pub place: bool,
    pub placement: Placement,
    pub offset: Point,
    pub screen: ScreenSelector,
    /// Двигать только первое окно приложения
    pub first_window_only: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnimationConfig {
    pub enabled: bool,
    pub duration_secs: f64,
    /// Частота тиков таймера, если нет синхронизации с дисплеем
    pub fallback_fps: u32,
}

impl AnimationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                filter: "winsnap=info".to_string(),
            },
            target: TargetConfig {
                bundle_identifier: DEFAULT_BUNDLE_IDENTIFIER.to_string(),
                poll_interval_ms: 1000,
            },
            window: WindowConfig {
                resize: false,
                size: Size::new(1200.0, 800.0),
                place: false,
                placement: Placement::Center,
                offset: Point::default(),
                screen: ScreenSelector::Primary,
                first_window_only: false,
            },
            animation: AnimationConfig {
                enabled: true,
                duration_secs: 0.25,
                fallback_fps: 60,
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        // Отсутствующий файл не ошибка: остаются значения по умолчанию
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("WINSNAP_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        if self.target.bundle_identifier.trim().is_empty() {
            anyhow::bail!("bundle_identifier не может быть пустым");
        }

        if self.target.poll_interval_ms < 100 {
            anyhow::bail!("poll_interval_ms должно быть минимум 100");
        }

        let size = self.window.size;
        if !(size.width > 0.0 && size.height > 0.0) || !size.width.is_finite() || !size.height.is_finite() {
            anyhow::bail!(
                "Размер окна должен быть положительным: {}x{}",
                size.width,
                size.height
            );
        }

        let offset = self.window.offset;
        if !offset.x.is_finite() || !offset.y.is_finite() {
            anyhow::bail!("Смещение окна должно быть конечным числом");
        }

        let duration = self.animation.duration_secs;
        if !(duration > 0.0 && duration <= 5.0) {
            anyhow::bail!("duration_secs должно быть в диапазоне (0, 5], получено {}", duration);
        }

        if !(1..=240).contains(&self.animation.fallback_fps) {
            anyhow::bail!(
                "fallback_fps должно быть в диапазоне 1..=240, получено {}",
                self.animation.fallback_fps
            );
        }

        Ok(())
    }
}

/// Хранилище настроек, которое меняет внешний код (перезагрузка по SIGHUP).
///
/// Ядро только читает: `snapshot()` отдаёт целостную копию на одну обработку,
/// поэтому поля никогда не читаются вразнобой во время замены.
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Публикует новую конфигурацию, предварительно проверив её
    pub fn replace(&self, config: Config) -> Result<()> {
        config.validate()?;
        *self.current.write() = Arc::new(config);
        Ok(())
    }

    /// Перечитывает файл; при ошибке остаётся прежний снапшот
    pub fn reload<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        self.replace(Config::load(config_path)?)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
