use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use webserv::config::AppConfig;
use webserv::error::Result;
use webserv::server::Server;
use webserv::signal;

#[derive(Parser, Debug)]
#[command(name = "webserv", about = "HTTP/1.1 origin server with a CGI/1.1 gateway")]
struct Args {
    /// Path to the configuration file.
    config: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args.config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(config_path)?;
    let config = AppConfig::parse(&content)?;
    config.log_summary();

    signal::install()?;

    let mut server = Server::new(config)?;
    info!("ready");
    server.run()
}
