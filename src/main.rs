use clap::Parser;
use log::info;
use servedir::logger;
use servedir::server::HttpServer;
use servedir::server::config::ServerConfig;
use servedir::server::shutdown::{self, ShutdownFlag};

fn main() -> std::io::Result<()> {
    logger::init();

    let config = ServerConfig::parse();
    info!("Starting static file server with config: {:?}", config);

    let flag = ShutdownFlag::new();
    shutdown::install(&flag);

    let server = HttpServer::new(&config)?;
    server.run(&flag);

    Ok(())
}
