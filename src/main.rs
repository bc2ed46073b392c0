use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use isolation_proxy::{admin, config, proxy::Proxy, telemetry};

/// HTTP isolation proxy: routes each request to a healthy endpoint of the
/// target service, tracking health passively and recovering it actively.
#[derive(Parser, Debug)]
#[command(name = "isolation-proxy", version, about)]
struct Cli {
	/// Path to the YAML configuration file (backends + services sections).
	#[arg(long, default_value = "proxy.yaml")]
	config: PathBuf,

	/// Stats listener address, overriding STATS_ADDR and the config file.
	#[arg(long)]
	stats_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	telemetry::init();
	let cli = Cli::parse();

	let config = config::load(&cli.config, cli.stats_addr.as_deref())?;
	info!(
		services = config.services.len(),
		backends = config.backends.values().map(Vec::len).sum::<usize>(),
		stats_addr = %config.stats_addr,
		"configuration loaded"
	);

	let proxy = Arc::new(Proxy::bootstrap(&config).await);

	let admin_registry = proxy.registry();
	let admin_counter = proxy.task_counter();
	let stats_addr = config.stats_addr;
	tokio::spawn(async move {
		if let Err(err) = admin::serve(stats_addr, admin_registry, admin_counter).await {
			tracing::error!(error = %err, "admin stats listener failed");
		}
	});

	let services = config.services.clone();
	tokio::select! {
		_ = proxy.run(&services) => {},
		_ = tokio::signal::ctrl_c() => {
			info!("received ctrl-c, exiting (directors are not drained; spec §4.4)");
		},
	}

	Ok(())
}
