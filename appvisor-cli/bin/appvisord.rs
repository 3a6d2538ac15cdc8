use std::process::ExitCode;

use appvisor_cli::{
    config_path, init_logging, load_config, reboot_host, AppvisorCliResult, AppvisordArgs,
    CHECKMARK,
};
use appvisor_core::{
    config::SupervisorSettings,
    management::Supervisor,
    platform::Platform,
    runtime::{self, ExitReason},
};
use clap::Parser;
use tokio::sync::mpsc;

//--------------------------------------------------------------------------------------------------
// Functions: Main
//--------------------------------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> AppvisorCliResult<ExitCode> {
    // Parse command line arguments
    let args = AppvisordArgs::parse();

    // Initialize tracing
    init_logging(args.log_level)?;

    // Load settings and app configuration
    let settings = SupervisorSettings::load(args.settings.as_deref())?;
    let config = load_config(&config_path(&settings, args.config.as_deref()))?;
    let allow_reboot = *settings.get_allow_reboot();

    // Build the supervisor
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let platform = Platform::system(settings, config, events_tx);
    let mut supervisor = Supervisor::new(platform);

    if args.no_autostart {
        tracing::info!("autostart disabled");
    } else {
        supervisor.launch_startup_apps()?;
    }

    for name in &args.start {
        match supervisor.start_app(name) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => tracing::error!("could not start app {}: {}", name, e),
        }
    }

    println!(
        "{} Supervising {} app(s): {}",
        &*CHECKMARK,
        supervisor.app_names().len(),
        console::style(supervisor.app_names().join(", ")).yellow()
    );

    // Supervise until shutdown
    match runtime::run(supervisor, events_rx).await {
        ExitReason::Shutdown => {
            tracing::info!("supervisor shut down");
            Ok(ExitCode::SUCCESS)
        }
        ExitReason::Reboot => {
            reboot_host(allow_reboot)?;
            Ok(ExitCode::FAILURE)
        }
        ExitReason::Fatal(e) => {
            tracing::error!("fatal: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
