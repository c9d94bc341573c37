use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flagstone::{Engine, TenantDocument};
use flagstone_server::server::config::ServiceConfig;
use flagstone_server::server::run_serve;

#[derive(Parser, Debug)]
#[command(name = "flagstone-server")]
#[command(version)]
#[command(about = "Self-hosted feature-flag service", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Path to the configuration file
        #[arg(short = 'c', long = "config", default_value = "flagstone.toml")]
        config: String,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,

        /// Override the configured hostname
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Validate a tenant document offline
    Validate {
        /// Path to a JSON tenant document
        #[arg(short = 'f', long = "file")]
        file: String,
    },
}

fn run_validate(path: &str) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            eprintln!("{path} does not exist");
            process::exit(1);
        }
    };

    let document: TenantDocument = match serde_json::from_str(&content) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("Parsing failed: {e}");
            process::exit(1);
        }
    };

    let engine = Engine::new();
    let mut problems = 0;
    let mut warnings = 0;

    for (key, flag) in &document.flags {
        let mut notes: Vec<String> = Vec::new();
        if key != &flag.id {
            problems += 1;
            notes.push(format!("key '{key}' does not match flag id '{}'", flag.id));
        }
        if let Err(e) = flag.validate(&document.segments) {
            problems += 1;
            notes.push(e.to_string());
        }
        for rule in &flag.rules {
            if let Err(e) = engine.check_expression(rule) {
                warnings += 1;
                notes.push(format!("rule never fires: {e}"));
            }
        }
        if notes.is_empty() {
            println!("  {key} ({} rules)", flag.rules.len());
        } else {
            for note in notes {
                println!("  {key}: {note}");
            }
        }
    }

    for (key, rule) in &document.segments {
        if let Err(e) = engine.check_expression(rule) {
            warnings += 1;
            println!("  segment {key}: never matches: {e}");
        }
    }

    println!();
    println!(
        "{path}: {} flags, {} segments, {problems} problems, {warnings} warnings",
        document.flags.len(),
        document.segments.len(),
    );

    if problems > 0 {
        process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flagstone_server=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Args::parse();
    match cli.cmd {
        Command::Serve {
            config,
            port,
            hostname,
        } => {
            let mut config = ServiceConfig::load(&config);
            config.apply_env_overrides();
            // CLI args override config file values, which override defaults
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(hostname) = hostname {
                config.server.hostname = hostname;
            }
            run_serve(config).await;
        }
        Command::Validate { file } => run_validate(&file),
    }
}
