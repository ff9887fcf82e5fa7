use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::{Config, ConfigStore, LoggingConfig};
use events::MainCommand;
use services::backend::DryRunScenario;
use services::{create_backend, AppWatcher, BackgroundService, MainLoop};

#[derive(Parser, Debug)]
#[command(name = "winsnap")]
#[command(about = "Подгоняет размер и положение новых окон выбранного приложения")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "winsnap.toml")]
    config: PathBuf,

    /// Режим сухого запуска (симулированный рабочий стол вместо Accessibility API)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает [logging] из конфигурации)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    init_tracing(&config.logging, args.log_level.as_deref())?;

    info!("Запуск winsnap v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config.display());

    if args.dry_run {
        warn!("Режим сухого запуска - окна симулируются в памяти");
    }

    let bundle_identifier = config.target.bundle_identifier.clone();
    let poll_interval_ms = config.target.poll_interval_ms;
    let backend = create_backend(&config, args.dry_run)?;
    let store = Arc::new(ConfigStore::new(config));

    // Проверка прав доступа
    if let Err(e) = utils::permissions::check_permissions(backend.accessibility.as_ref()) {
        warn!("{}: подключение к приложению не удастся до выдачи доступа", e);
    }

    // Инициализация компонентов
    let (main_tx, main_rx) = unbounded_channel();
    let mut main_loop = MainLoop::new(store.clone(), &backend, main_tx.clone(), main_rx);
    let attached = main_loop.attach_if_running();
    let watcher = AppWatcher::new(backend.apps.clone(), &bundle_identifier, poll_interval_ms, main_tx.clone())
        .with_known_pid(attached);

    info!("Все компоненты инициализированы");

    // Запуск всех сервисов параллельно
    let main_service: Box<dyn BackgroundService + Send> = Box::new(main_loop);
    let main_handle = tokio::spawn(async move {
        if let Err(e) = main_service.run().await {
            error!("Ошибка в MainLoop: {}", e);
        }
    });
    let watcher_service: Box<dyn BackgroundService + Send> = Box::new(watcher);
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher_service.run().await {
            error!("Ошибка в AppWatcher: {}", e);
        }
    });
    let scenario_handle = backend.desktop.clone().map(|desktop| {
        let scenario = DryRunScenario::new(desktop, &bundle_identifier);
        tokio::spawn(scenario.run())
    });

    info!("Все сервисы запущены");

    wait_for_shutdown(&store, &args.config).await;

    info!("Завершение работы...");

    // Главный цикл сам отменяет анимации и снимает подписку
    request_shutdown(&main_tx);

    watcher_handle.abort();
    if let Some(handle) = &scenario_handle {
        handle.abort();
    }

    // Ожидаем завершения задач (с таймаутом)
    let shutdown_timeout = tokio::time::Duration::from_secs(5);
    let shutdown_result = tokio::time::timeout(shutdown_timeout, async {
        let _ = main_handle.await;
        let _ = watcher_handle.await;
        if let Some(handle) = scenario_handle {
            let _ = handle.await;
        }
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("Все сервисы завершили работу корректно"),
        Err(_) => warn!("Таймаут при завершении сервисов"),
    }

    info!("winsnap завершил работу");
    Ok(())
}

fn request_shutdown(main_tx: &UnboundedSender<MainCommand>) {
    if main_tx.send(MainCommand::Shutdown).is_err() {
        warn!("Главный цикл уже остановлен");
    }
}

/// Ждёт Ctrl+C; SIGHUP перечитывает конфигурацию
#[cfg(unix)]
async fn wait_for_shutdown(store: &ConfigStore, config_path: &Path) {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut hangup = match unix_signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Не удалось подписаться на SIGHUP: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_ctrl_c() => return,
            _ = hangup.recv() => {
                info!("Получен SIGHUP, перечитываем {}", config_path.display());
                match store.reload(config_path) {
                    Ok(()) => info!("Конфигурация обновлена"),
                    Err(e) => warn!("Конфигурация не обновлена, остаются прежние настройки: {}", e),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_store: &ConfigStore, _config_path: &Path) {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Получен сигнал завершения (Ctrl+C)");
        }
        Err(err) => {
            error!("Ошибка при ожидании сигнала завершения: {}", err);
        }
    }
}

fn init_tracing(logging: &LoggingConfig, level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let directive = match level {
        Some(level) => level,
        None if !logging.filter.trim().is_empty() => logging.filter.as_str(),
        None => logging.level.as_str(),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directive))?;

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    Ok(())
}
