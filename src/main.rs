use ravel::{Reactor, ServerConfig};
use std::path::Path;
use std::process::ExitCode;
use tracing::error;

fn usage(program: &str) -> ExitCode {
    eprintln!("usage: {} <host> <port> [config.json]", program);
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("ravel");
    if args.len() < 3 || args.len() > 4 {
        return usage(program);
    }

    let host = &args[1];
    let port: u16 = match args[2].parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("invalid port: {}", args[2]);
            return usage(program);
        }
    };

    let config = match args.get(3) {
        Some(path) => match ServerConfig::load(Path::new(path)) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to load config");
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };

    let mut reactor = match Reactor::new(host, port, config) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let writer = reactor.wake_writer();
    if let Err(e) = ctrlc::set_handler(move || writer.request_stop()) {
        error!(error = %e, "failed to install signal handler");
        return ExitCode::FAILURE;
    }

    match reactor.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
