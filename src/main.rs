use std::{path::Path, path::PathBuf, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    EdgeServer, GracefulShutdown, HttpClientAdapter, HttpServer, LetsEncryptProvider,
    ProxyHandler, RegistryRouter, Resolver, ServerOption,
    adapters::{
        tls::load_server_config,
        websocket_tunnel::{TunnelPolicy, WebSocketTunnel},
    },
    config::{GatewayConfig, GatewayConfigValidator, load_config},
    core::{Binding, Service},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the edge server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {config_path}"))?;

    tracing_setup::init_tracing(&config.log)?;

    GatewayConfigValidator::validate(&config).wrap_err("Configuration validation failed")?;

    let server = build_server(&config)?;
    server.start().await.wrap_err("Failed to start edge server")?;
    tracing::info!("Portico edge server listening on {}", server.address());

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = shutdown.clone();
    tokio::spawn(async move {
        signal_handler.run_signal_handler().await;
    });

    let reason = shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received: {:?}", reason);

    match shutdown.bounded(server.stop()).await {
        Some(Ok(())) => tracing::info!("Graceful shutdown completed"),
        Some(Err(e)) => tracing::error!("Error while stopping edge server: {}", e),
        None => tracing::warn!("Edge server did not stop in time"),
    }

    Ok(())
}

/// Wire the configured binding, proxy and listener options into a server.
fn build_server(config: &GatewayConfig) -> Result<EdgeServer> {
    let registry = RegistryRouter::new(config.services.clone(), config.routes.clone());
    let binding = match &config.service {
        Some(name) => {
            let service = registry
                .service(name)
                .cloned()
                .unwrap_or_else(|| Service::new(name.clone(), vec![]));
            tracing::info!(
                "Binding every request to service '{}' ({} nodes)",
                name,
                service.node_count()
            );
            Binding::Static(service)
        }
        None => {
            tracing::info!("Routing by path prefix across {} routes", config.routes.len());
            Binding::Dynamic(Arc::new(registry))
        }
    };
    let resolver = Arc::new(Resolver::new(binding));

    let policy = TunnelPolicy {
        dial_timeout: config
            .tunnel
            .dial_timeout()
            .wrap_err("Invalid tunnel.dial_timeout")?,
        drain_grace: config
            .tunnel
            .drain_grace()
            .wrap_err("Invalid tunnel.drain_grace")?,
    };

    let http_client = Arc::new(HttpClientAdapter::new()?);
    let proxy = ProxyHandler::new(resolver, http_client)
        .with_tunnel(WebSocketTunnel::new(policy))
        .with_preserve_host(config.proxy.preserve_host);

    let mut options = vec![ServerOption::EnableCors(config.enable_cors)];

    if config.enable_tls {
        let tls = config
            .tls
            .as_ref()
            .ok_or_else(|| eyre!("TLS enabled but no tls section found"))?;
        let tls_config = load_server_config(&tls.cert_path, &tls.key_path)?;
        options.push(ServerOption::EnableTls(true));
        options.push(ServerOption::TlsConfig(Arc::new(tls_config)));
    }

    if config.enable_acme {
        let acme = config
            .acme
            .as_ref()
            .ok_or_else(|| eyre!("ACME enabled but no acme section found"))?;
        let provider = LetsEncryptProvider::new(
            acme.email.clone(),
            Some(PathBuf::from(&acme.cache_dir)),
            acme.production,
        );
        options.push(ServerOption::EnableAcme(true));
        options.push(ServerOption::AcmeHosts(acme.hosts.clone()));
        options.push(ServerOption::AcmeProvider(Arc::new(provider)));
    }

    let server = EdgeServer::new(config.listen_addr.clone(), options);
    server.handle("/", proxy.into_route());
    Ok(server)
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    // First check if file exists and is readable
    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
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

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            match &config.service {
                Some(service) => println!("   • Static Service: {service}"),
                None => println!("   • Routes: {}", config.routes.len()),
            }
            println!("   • Services: {}", config.services.len());
            println!("   • TLS Enabled: {}", config.enable_tls);
            println!("   • ACME Enabled: {}", config.enable_acme);
            println!("   • CORS Enabled: {}", config.enable_cors);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Use 'HOST:PORT' or ':PORT' for listen_addr and node addresses");
            println!("   • Make sure every route names a configured service");
            println!("   • Check that certificate paths exist");
            println!("   • Durations use humantime units (e.g. '500ms', '10s')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Portico Edge Configuration

# The address to listen on (":PORT" listens on every interface)
listen_addr = ":8080"

enable_cors = false

# Bind every request to one service instead of routing by prefix:
# service = "greeter"

# Static certificate TLS
enable_tls = false
# [tls]
# cert_path = "cert.pem"
# key_path = "key.pem"

# Let's Encrypt certificates (takes precedence over static TLS)
enable_acme = false
# [acme]
# hosts = ["example.com"]
# email = "ops@example.com"
# cache_dir = ".portico/acme"
# production = false

[proxy]
preserve_host = true

[tunnel]
# dial_timeout = "10s"
drain_grace = "1s"

[log]
level = "info"
json = false

[[services]]
name = "greeter"
version = "1.0"
nodes = [{ id = "greeter-1", address = "127.0.0.1:9000" }]

[routes]
"/" = "greeter"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'portico serve --config {config_path}' to start the server");
    Ok(())
}
