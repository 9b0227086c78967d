mod logging;

use sqlform_core::settings::{ConfigError, Settings};
use tracing::info;

fn run_app(
    load_settings: impl FnOnce() -> Result<Settings, ConfigError>,
    run_tui: impl FnOnce(Settings) -> Result<(), sqlform_tui::TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings()?;
    info!(
        core = sqlform_core::domain_name(),
        ui = sqlform_tui::ui_name(),
        value_mode = ?settings.value_mode,
        export_enabled = settings.export_enabled,
        "starting"
    );
    run_tui(settings)?;
    info!("exiting");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match logging::log_path() {
        Ok(path) => {
            if let Err(error) = logging::init_file_logging(&path) {
                eprintln!("warning: logging disabled, cannot open {}: {error}", path.display());
            }
        }
        Err(error) => eprintln!("warning: logging disabled: {error}"),
    }
    run_app(Settings::load_default, sqlform_tui::run)
}
