use std::env;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use getopts::Options;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use zonegate::dns::config::ProxyConfig;
use zonegate::dns::context::{spawn_config_watcher, ProxyContext};
use zonegate::web::gateway::Gateway;
use zonegate::web::server::ProxyServer;

const CONFIG_PATH_ENV: &str = "PROXY_CONFIG_PATH";
const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 10;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn init_logger() {
    let level = env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| LevelFilter::from_str(&level).ok())
        .unwrap_or(LevelFilter::Info);

    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {}", e);
    }
}

/// Main entry point for the proxy
fn main() {
    init_logger();

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "c",
        "config",
        "Path to the YAML configuration (default: $PROXY_CONFIG_PATH)",
        "FILE",
    );
    opts.optopt(
        "",
        "reload-interval",
        "Seconds between checks for configuration changes, 0 disables reloading",
        "SECONDS",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            process::exit(1);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let config_path = match opt_matches
        .opt_str("c")
        .or_else(|| env::var(CONFIG_PATH_ENV).ok())
    {
        Some(path) => PathBuf::from(path),
        None => {
            log::error!("No configuration given, use --config or set {}", CONFIG_PATH_ENV);
            process::exit(1);
        }
    };

    let reload_interval = match opt_matches.opt_str("reload-interval") {
        Some(value) => match value.parse::<u64>() {
            Ok(secs) => secs,
            Err(_) => {
                log::error!("Invalid reload interval: {}", value);
                process::exit(1);
            }
        },
        None => DEFAULT_RELOAD_INTERVAL_SECS,
    };

    let config = match ProxyConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration {}: {}", config_path.display(), e);
            process::exit(1);
        }
    };

    let listen = config.listen.clone();
    let worker_threads = config.worker_threads;

    let context = match ProxyContext::from_config(config) {
        Ok(context) => Arc::new(context),
        Err(e) => {
            log::error!("Proxy failed to initialize: {}", e);
            process::exit(1);
        }
    };

    if reload_interval > 0 {
        if let Err(e) = spawn_config_watcher(
            context.clone(),
            config_path.clone(),
            Duration::from_secs(reload_interval),
        ) {
            log::warn!("Failed to start configuration watcher: {}", e);
        }
    }

    let server = match ProxyServer::bind(Gateway::new(context), &listen, worker_threads) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to bind: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        log::error!("Proxy server stopped: {}", e);
        process::exit(1);
    }
}
