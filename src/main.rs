mod app_core;
mod artwork;
mod auth;
mod callback_listener;
mod config;
mod credentials;
mod error;
mod playback;
mod token_store;
mod ui_manager;

use config::AppConfig;
use credentials::AppCredentials;
use eframe::egui;
use error::VibifyError;
use ui_manager::VibifyApp;

fn main() -> Result<(), VibifyError> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("Starting Vibify...");

    let config = AppConfig::load()?;
    let credentials = AppCredentials::load(&config.credentials_path)?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Vibify")
            .with_inner_size(config.window_size),
        ..Default::default()
    };

    let app_config = config.clone();
    eframe::run_native(
        "Vibify",
        native_options,
        Box::new(
            move |cc| -> std::result::Result<
                Box<dyn eframe::App>,
                Box<dyn std::error::Error + Send + Sync>,
            > {
                let worker = app_core::spawn(&app_config, &credentials, cc.egui_ctx.clone())?;
                Ok(Box::new(VibifyApp::new(worker, &app_config)))
            },
        ),
    )
    .map_err(|e| VibifyError::UIError(e.to_string()))?;

    // Save configuration
    config.save()?;
    log::info!("Vibify out!");

    Ok(())
}
