//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::{Error, Result};

const APP_DIR: &str = "shutterfeed";

#[derive(Debug, Parser)]
#[command(name = "shutterfeed", version, about = "Camera-to-server photo sync")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept uploads and serve the photo catalog
    Server(ServerArgs),
    /// Watch a camera and push new photos to a server
    Pusher(PusherArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "SHUTTERFEED_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Photos directory (defaults to the user data directory)
    #[arg(long, env = "SHUTTERFEED_DIR")]
    pub dir: Option<PathBuf>,

    /// Per-photo processing deadline
    #[arg(long, env = "SHUTTERFEED_PROCESSING_TIMEOUT_SECS", default_value_t = 5)]
    pub processing_timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct PusherArgs {
    /// Base URL of the server
    #[arg(long, env = "SHUTTERFEED_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    pub server_url: String,

    /// Mount point of the camera
    #[arg(long, env = "SHUTTERFEED_DEVICE_DIR")]
    pub device_dir: PathBuf,

    /// Seconds between sync cycles
    #[arg(long, env = "SHUTTERFEED_REFRESH_SECS", default_value_t = 10)]
    pub refresh_secs: u64,

    #[arg(long, env = "SHUTTERFEED_UPLOAD_TIMEOUT_SECS", default_value_t = 60)]
    pub upload_timeout_secs: u64,
}

impl PusherArgs {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Resolved server settings and on-disk layout
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub photos_dir: PathBuf,
    pub processing_timeout: Duration,
}

impl ServerConfig {
    pub fn new(photos_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            photos_dir: photos_dir.into(),
            processing_timeout: crate::ingest::pipeline::DEFAULT_DEADLINE,
        }
    }

    pub fn from_args(args: &ServerArgs) -> Result<Self> {
        let photos_dir = match &args.dir {
            Some(dir) => dir.clone(),
            None => default_photos_dir()?,
        };
        Ok(Self {
            listen: args.listen,
            photos_dir,
            processing_timeout: Duration::from_secs(args.processing_timeout_secs),
        })
    }

    /// Full-size photos and thumbnails
    pub fn img_folder(&self) -> PathBuf {
        self.photos_dir.join("img")
    }

    pub fn conf_folder(&self) -> PathBuf {
        self.photos_dir.join("conf.d")
    }

    /// SQLite catalog
    pub fn db_file(&self) -> PathBuf {
        self.conf_folder().join("shutterfeed.db")
    }

    /// Create the directory layout and check it is usable
    pub fn prepare(&self) -> Result<()> {
        for dir in [self.img_folder(), self.conf_folder()] {
            std::fs::create_dir_all(&dir)?;
            check_writable(&dir)?;
        }
        tracing::debug!(dir = %self.photos_dir.display(), "photos directory ready");
        Ok(())
    }
}

fn default_photos_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(Error::InvalidInput("unable to determine a data directory"))
}

fn check_writable(dir: &Path) -> Result<()> {
    let marker = dir.join(".write-marker");
    std::fs::write(&marker, b"")?;
    std::fs::remove_file(&marker)?;
    std::fs::read_dir(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let config = ServerConfig::new("/srv/photos");

        assert_eq!(config.img_folder(), PathBuf::from("/srv/photos/img"));
        assert_eq!(config.conf_folder(), PathBuf::from("/srv/photos/conf.d"));
        assert_eq!(config.db_file(), PathBuf::from("/srv/photos/conf.d/shutterfeed.db"));
    }

    #[test]
    fn test_prepare_creates_folders() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path().join("photos"));

        config.prepare().unwrap();

        assert!(config.img_folder().is_dir());
        assert!(config.conf_folder().is_dir());
    }

    #[test]
    fn test_parse_server_command() {
        let cli = Cli::try_parse_from([
            "shutterfeed",
            "server",
            "--listen",
            "0.0.0.0:9000",
            "--dir",
            "/srv/photos",
        ])
        .unwrap();

        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = ServerConfig::from_args(&args).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.photos_dir, PathBuf::from("/srv/photos"));
    }

    #[test]
    fn test_parse_pusher_command() {
        let cli = Cli::try_parse_from([
            "shutterfeed",
            "pusher",
            "--device-dir",
            "/media/camera",
            "--refresh-secs",
            "0",
        ])
        .unwrap();

        let Command::Pusher(args) = cli.command else {
            panic!("expected pusher command");
        };
        assert_eq!(args.device_dir, PathBuf::from("/media/camera"));
        assert_eq!(args.refresh_interval(), Duration::from_secs(1));
    }
}
