use std::{error::Error, path::PathBuf};

use clap::Parser;
use ssdp_redirect::{multicast_interfaces, AdvertListener, Interface};
#[cfg(target_family = "unix")]
use tokio::signal::{self, unix::SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{FileConfig, RedirectArguments, RedirectConfig};

mod config;
mod relay;

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file. Values given on the command line take precedence over values
    /// in the file.
    #[arg(short = 'c', long = "config-file")]
    config_file: Option<PathBuf>,

    /// Enable debug logging. Does nothing if `--silent` is set.
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Disable all logs except error logs.
    #[arg(long = "silent", default_value_t = false)]
    silent: bool,

    /// Log in logfmt format.
    #[arg(long = "logfmt", default_value_t = false)]
    logfmt: bool,

    #[clap(flatten)]
    redirect_args: RedirectArguments,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.silent {
        LevelFilter::ERROR
    } else if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;
    if cli.logfmt {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_logfmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let file_config = if let Some(path) = &cli.config_file {
        FileConfig::load(path).await.inspect_err(|e| {
            error!(path = %path.display(), err = %e, "Failed to load config file");
        })?
    } else {
        FileConfig::default()
    };
    let config = RedirectConfig::merge(cli.redirect_args, file_config)?;

    let mifs = select_interfaces(multicast_interfaces(), &config.interfaces);
    if mifs.len() < 2 {
        warn!(
            interfaces = mifs.len(),
            "Less than 2 interfaces selected, advertisements won't be redirected anywhere"
        );
    }

    if !config.header_edits.is_empty() {
        info!("Header edits are applied to redirected advertisements");
    }

    let cancel_token = CancellationToken::new();
    let mut workers = Vec::with_capacity(config.groups.len());
    for group in config.groups {
        let listener = AdvertListener::bind(group, mifs.clone()).inspect_err(|e| {
            error!(%group, err = %e, "Failed to bind advertisement listener");
        })?;
        workers.push(tokio::spawn(relay::run(
            listener,
            config.header_edits.clone(),
            cancel_token.clone(),
        )));
    }

    info!("Redirecting SSDP advertisements");

    #[cfg(target_family = "unix")]
    {
        let mut sigint = signal::unix::signal(SignalKind::interrupt())?;
        let mut sigterm = signal::unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => { }
            _ = sigterm.recv() => { }
        }
    }
    #[cfg(not(target_family = "unix"))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for SIGINT: {e}");
        }
    }

    info!("Shutting down");
    cancel_token.cancel();
    for worker in workers {
        worker.await?;
    }

    Ok(())
}

/// Keep only the interfaces with the given names, or all interfaces if no names are given.
fn select_interfaces(available: Vec<Interface>, names: &[String]) -> Vec<Interface> {
    if names.is_empty() {
        return available;
    }
    for name in names {
        if !available.iter().any(|ifi| ifi.name == *name) {
            warn!(iface = %name, "Configured interface not found or not multicast capable");
        }
    }

    available
        .into_iter()
        .filter(|ifi| names.contains(&ifi.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use ssdp_redirect::Interface;

    use super::select_interfaces;

    #[test]
    fn interface_selection() {
        let available = || {
            vec![
                Interface::new(1, "eth0"),
                Interface::new(2, "eth1"),
                Interface::new(3, "wlan0"),
            ]
        };

        assert_eq!(select_interfaces(available(), &[]).len(), 3);

        let selected = select_interfaces(
            available(),
            &["wlan0".to_string(), "eth0".to_string(), "eth9".to_string()],
        );
        assert_eq!(
            selected.iter().map(|ifi| ifi.index).collect::<Vec<_>>(),
            [1, 3]
        );
    }
}
