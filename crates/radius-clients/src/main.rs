use clap::Parser;
use radius_clients::{ClientsConfig, Transport};
use std::net::IpAddr;
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// USG RADIUS client registry - validate client configuration and resolve peers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radius-clients")]
struct Cli {
    /// Path to client configuration file
    #[arg(value_name = "CONFIG", default_value = "clients.json")]
    config_path: String,

    /// Validate configuration and exit
    #[arg(short, long)]
    validate: bool,

    /// Resolve a source address against the global clients
    #[arg(short, long, value_name = "ADDR")]
    lookup: Option<IpAddr>,

    /// Transport of the looked-up request: udp, tcp, tls or any
    #[arg(short, long, default_value = "any")]
    proto: String,
}

fn main() {
    let cli = Cli::parse();

    // Load or create configuration (without logging first)
    let config = match ClientsConfig::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate || cli.lookup.is_some() {
                eprintln!("Configuration validation failed!");
                eprintln!("   Error: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);

            if let Err(e) = ClientsConfig::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and run again", cli.config_path);
            process::exit(0);
        }
    };

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let scopes = match config.load() {
        Ok(scopes) => scopes,
        Err(e) => {
            error!("Invalid client configuration: {}", e);
            process::exit(1);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Max request time: {}s", config.max_request_time);
        println!("  Servers: {}", config.servers.len());
        println!();

        let global = scopes.default_registry();
        if global.is_empty() {
            println!("WARNING: No global clients configured!");
        } else {
            println!("Global clients:");
            for client in global.clients() {
                println!(
                    "  #{} {} - {}",
                    client.number().unwrap_or_default(),
                    client.key(),
                    client.display_name()
                );
            }
        }

        for server in &config.servers {
            let count = scopes
                .servers()
                .find_virtual_server(&server.name)
                .and_then(|s| s.clients().map(|r| r.len()))
                .unwrap_or(0);
            println!("Server {}: {} clients", server.name, count);
        }

        process::exit(0);
    }

    if let Some(addr) = cli.lookup {
        let transport = match Transport::from_proto(&cli.proto) {
            Some(transport) => transport,
            None => {
                error!("Unknown proto \"{}\"", cli.proto);
                process::exit(1);
            }
        };

        match scopes.find(addr, transport, None) {
            Some(client) => {
                println!("{} ({}) -> {}", addr, transport, client.display_name());
                println!("  Network: {}", client.key());
                if let Some(nas_type) = client.nas_type() {
                    println!("  NAS type: {}", nas_type);
                }
                if let Some(server) = client.server() {
                    println!("  Virtual server: {}", server);
                }
                process::exit(0);
            }
            None => {
                warn!(client_ip = %addr, "Unknown client");
                println!("{} ({}) -> no matching client", addr, transport);
                process::exit(2);
            }
        }
    }

    let global = scopes.default_registry();
    info!("Loaded {} global clients from {}", global.len(), cli.config_path);
}
