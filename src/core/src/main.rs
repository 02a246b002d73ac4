use leurre::configuration::config::Config;
use leurre::controller::Controller;
use leurre::error_handling::types::ControllerError;
use leurre::storage::build_writers;
use log::{error, info, LevelFilter};

fn init_logging(level: LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_target(false)
        .init();
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
                return;
            }
            Err(e) => error!("Unable to install the SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to wait for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            init_logging(LevelFilter::Info);
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };

    let level = if config.verbose {
        LevelFilter::Debug
    } else if config.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    init_logging(level);

    if !config.quiet {
        println!(
            "
 _
| | ___ _   _ _ __ _ __ ___
| |/ _ \\ | | | '__| '__/ _ \\
| |  __/ |_| | |  | | |  __/
|_|\\___|\\__,_|_|  |_|  \\___|
==============================
 credential capture v{}
==============================
",
            env!("CARGO_PKG_VERSION")
        );
    }

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let writers = match build_writers(controller.outputs()).await {
        Ok(writers) => writers,
        Err(e) => {
            error!("Unable to open the outputs: {}", e);
            std::process::exit(1);
        }
    };

    match controller.run(writers, termination()).await {
        Ok(()) => info!("Bye"),
        Err(ControllerError::Interrupted) => {
            error!("Interrupted before every listener started, exiting");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
