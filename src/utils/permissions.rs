use crate::error::Result;
use crate::services::backend::Accessibility;
use crate::snap_error;
use tracing::{info, warn};

/// Проверить доступ к Accessibility API.
///
/// Без доступа демон продолжает работать: подключение к приложению не
/// удастся и будет повторено при следующем запуске.
pub fn check_permissions(accessibility: &dyn Accessibility) -> Result<()> {
    info!("Проверка прав доступа...");

    if accessibility.is_trusted() {
        info!("Доступ к Accessibility API подтверждён");
        return Ok(());
    }

    for line in setup_instructions() {
        warn!("{}", line);
    }
    Err(snap_error!(permission, "процесс не в списке доверенных Accessibility"))
}

/// Как выдать доступ вручную
pub fn setup_instructions() -> Vec<String> {
    vec![
        "⚠️  Нет доступа к Accessibility API!".to_string(),
        "   Откройте Системные настройки → Конфиденциальность и безопасность → Универсальный доступ".to_string(),
        "   и разрешите доступ терминалу или бинарнику winsnap".to_string(),
        "   (затем перезапустите winsnap)".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::DryRunDesktop;

    #[test]
    fn test_trusted_process_passes() {
        let desktop = DryRunDesktop::new();
        assert!(check_permissions(&desktop).is_ok());
    }

    #[test]
    fn test_untrusted_process_is_not_fatal() {
        let desktop = DryRunDesktop::new();
        desktop.set_trusted(false);
        assert!(matches!(
            check_permissions(&desktop),
            Err(crate::error::SnapError::Permission(_))
        ));
        assert!(setup_instructions().iter().any(|line| line.contains("Универсальный доступ")));
    }
}
