use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("WAGGLE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
            .parse()?;

        let data_dir = std::env::var("WAGGLE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./waggle-data"));

        let log_level = std::env::var("WAGGLE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("WAGGLE_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            listen_addr,
            data_dir,
            log_level,
            dev_mode,
        })
    }
}
