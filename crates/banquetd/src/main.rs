use banquet_engine::config::ServerConfig;
use banquet_engine::engine::Engine;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "banquetd",
    version,
    about = "Banquet query server",
    disable_help_subcommand = true
)]
struct Cli {
    /// Serve at HOST:PORT; port 0 lets the OS pick
    #[arg(short = 'S', value_name = "HOST:PORT")]
    serve: Option<String>,

    /// Write the bound port to FILE for client discovery
    #[arg(long = "port-file", value_name = "FILE")]
    port_file: Option<PathBuf>,

    /// Validate and quote identifiers in compiled SQL
    #[arg(long)]
    hardened: bool,

    /// Table queried when a dataset URL names none
    #[arg(long = "default-table", value_name = "NAME")]
    default_table: Option<String>,
}

fn parse_host_port(s: &str) -> Result<(String, u16), String> {
    if let Some(rest) = s.strip_prefix('[') {
        // bracketed IPv6: [host]:port
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let remain = &rest[end + 1..];
            let port = remain
                .strip_prefix(':')
                .ok_or("missing port after IPv6 host")?;
            let port: u16 = port.parse().map_err(|_| "invalid port".to_string())?;
            return Ok((host.to_string(), port));
        }
        return Err("invalid bracketed IPv6 address".to_string());
    }
    let mut parts = s.rsplitn(2, ':');
    let port_str = parts.next().ok_or("missing port")?;
    let host = parts.next().ok_or("missing host")?;
    let port: u16 = port_str.parse().map_err(|_| "invalid port".to_string())?;
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ServerConfig::default();

    if let Some(addr) = cli.serve.as_deref() {
        match parse_host_port(addr) {
            Ok((host, port)) => {
                config.host = host;
                config.port = port;
            }
            Err(e) => {
                eprintln!("-S expects HOST:PORT (e.g. 127.0.0.1:3000), error: {}", e);
                std::process::exit(2);
            }
        }
    } else if let Ok(port) = std::env::var("PORT") {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => {
                eprintln!("PORT must be a number, got '{}'", port);
                std::process::exit(2);
            }
        }
    } else {
        // no port given: the OS picks one and clients find it in this file
        config.port_file = Some(PathBuf::from("/tmp/banquetd.port"));
    }

    if let Some(file) = cli.port_file {
        config = config.set_port_file(file);
    }
    config.hardened_sql = cli.hardened;
    if let Some(table) = cli.default_table {
        config = config.set_default_table(table);
    }

    let engine = Engine::new(config);
    if let Err(e) = engine.run().await {
        eprintln!("server error: {}", e);
        std::process::exit(1);
    }
}
