use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "A simple static file server similar to GitHub Pages", long_about = None)]
pub struct ServerConfig {
    /// Address to bind the listener on
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to serve on
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Directory of static files to serve
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Number of worker threads handling connections
    #[arg(short, long, default_value_t = 8)]
    pub threads: usize,

    /// Maximum accepted size of a request head in bytes
    #[arg(long, default_value_t = 8192)]
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            directory: PathBuf::from("."),
            threads: 8,
            max_request_size: 8192,
        }
    }
}
