pub mod config;
pub mod handler;
pub mod http_status;
pub mod listing;
pub mod request;
pub mod shutdown;

use log::{debug, error, info};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use threadpool::ThreadPool;

use config::ServerConfig;
use shutdown::ShutdownFlag;

pub struct HttpServer {
    config: ServerConfig,
    root: PathBuf,
    listener: TcpListener,
    thread_pool: ThreadPool,
}

impl HttpServer {
    /// Canonicalizes the served root and binds the listener. A missing or
    /// non-directory path fails here, before any socket is created.
    pub fn new(config: &ServerConfig) -> io::Result<Self> {
        let root = config.directory.canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)?;
        listener.set_nonblocking(true)?;

        info!("Server started on {}", listener.local_addr()?);

        let thread_pool = ThreadPool::new(config.threads);

        Ok(Self {
            config: config.clone(),
            root,
            listener,
            thread_pool,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Accepts connections until the shutdown flag is raised, then drains
    /// the worker pool so no in-flight connection is left dangling.
    pub fn run(&self, shutdown: &ShutdownFlag) {
        info!("Server running with {} threads", self.config.threads);

        let port = match self.local_addr() {
            Ok(addr) => addr.port(),
            Err(_) => self.config.port,
        };
        println!(
            "Serving static files from '{}' at http://{}:{}",
            self.config.directory.display(),
            display_host(&self.config.host),
            port
        );

        let mut total_connections: usize = 0;

        while !shutdown.is_requested() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    total_connections += 1;

                    let root = self.root.clone();
                    let max_request_size = self.config.max_request_size;
                    self.thread_pool.execute(move || {
                        handler::handle_client(stream, &root, max_request_size);
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }

        debug!("Shutdown requested, draining worker pool");
        self.thread_pool.join();

        println!("\nShutting down the server.");
        info!("Server stopped after {} connections", total_connections);
    }
}

fn display_host(host: &str) -> &str {
    if host == "0.0.0.0" { "localhost" } else { host }
}
