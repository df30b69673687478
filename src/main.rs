use std::{net::SocketAddr, sync::Arc};

use api_router::{
    adapters::{
        ChannelProducer, Collaborators, HealthChecker, HttpClientAdapter, ZebedeeIdentityClient,
        build_router, health_targets, run_audit_sink,
    },
    config::{Config, ConfigValidator, load_config},
    core::{MountTable, SystemClock},
    ports::HttpClient,
    tracing_setup,
    utils::{GracefulShutdown, ShutdownReason},
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Optional configuration file layered under environment variables
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate the configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_config_command(config_path),
        Commands::Serve => serve(config_path).await,
    }
}

fn load_and_validate(config_path: Option<&str>) -> Result<Config> {
    let config = load_config(config_path).wrap_err("Failed to load configuration")?;
    ConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {e}"))?;
    Ok(config)
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = Arc::new(load_and_validate(config_path)?);

    tracing_setup::init_tracing_with_config(&config.log_level, config.log_json)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        version = %config.version,
        "Starting API router"
    );

    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(config.upstream_timeout()?)
            .context("Failed to create HTTP client adapter")?,
    );
    let clock = Arc::new(SystemClock);

    let (audit_producer, audit_rx) = ChannelProducer::new(config.audit_queue_size);
    let audit_task = tokio::spawn(run_audit_sink(audit_rx, config.audit_topic.clone()));

    let table = MountTable::from_config(&config).context("Failed to build mount table")?;
    let health = Arc::new(HealthChecker::new(
        health_targets(&table),
        http_client.clone(),
        clock.clone(),
        config.health_check_interval()?,
        config.health_check_critical_timeout()?,
    ));
    let health_task = {
        let health = health.clone();
        tokio::spawn(async move { health.run().await })
    };

    let app = build_router(
        &config,
        Collaborators {
            http_client: http_client.clone(),
            identity: Arc::new(ZebedeeIdentityClient::new(
                &config.zebedee_url,
                http_client.clone(),
            )),
            audit_producer: Arc::new(audit_producer),
            health,
            clock,
        },
    )?;

    let shutdown = Arc::new(GracefulShutdown::with_timeout(
        config.graceful_shutdown_timeout()?,
    ));
    let signal_handler_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    let stop_accepting = shutdown.wait_for_shutdown_signal();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        stop_accepting.await;
    });
    let mut server = std::pin::pin!(server.into_future());

    let signalled = tokio::select! {
        result = &mut server => {
            result.context("Server error")?;
            false
        }
        reason = shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
            true
        }
    };

    let reason = if signalled {
        shutdown.drain(&mut server).await
    } else {
        ShutdownReason::Graceful
    };

    tracing::info!("Shutting down health checker...");
    health_task.abort();
    audit_task.abort();

    match reason {
        ShutdownReason::Graceful => {
            tracing::info!("Graceful shutdown completed");
            Ok(())
        }
        ShutdownReason::Force => Err(eyre!(
            "In-flight requests still running after {:?}",
            shutdown.drain_timeout()
        )),
    }
}

/// Validate configuration and exit
fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    match config_path {
        Some(path) => println!("🔍 Validating configuration: {path} + environment"),
        None => println!("🔍 Validating configuration from environment"),
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            let mounts = MountTable::from_config(&config)
                .map(|table| table.mounts().len())
                .unwrap_or_default();
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Bind Address: {}", config.bind_addr);
            println!("   • API Version: {}", config.version);
            println!("   • Mounts: {mounts}");
            println!("   • Private Endpoints: {}", config.enable_private_endpoints);
            println!("   • Beta Restriction: {}", config.enable_v1_beta_restriction);
            println!("   • Audit Topic: {}", config.audit_topic);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all URLs start with http:// or https://");
            println!("   • Verify bind address format (e.g., '0.0.0.0:23200')");
            println!("   • Use humantime durations (e.g., '5s', '1m30s')");
            std::process::exit(1);
        }
    }
}
