//! Ingestion server
//!
//! Accepts multipart uploads, processes them in the background and serves
//! the catalog, originals and thumbnails back out.

pub mod ingest;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::state::library::{Library, PhotoStore};

pub use ingest::{Accepted, Ingestor};
pub use routes::AppState;

pub struct Server {
    config: ServerConfig,
    ingestor: Arc<Ingestor>,
}

impl Server {
    /// Prepare the photos directory and open the catalog
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.prepare()?;
        let library = Library::open(&config.db_file())?;
        let store: Arc<dyn PhotoStore> = Arc::new(library);
        let ingestor = Ingestor::new(store, config.img_folder(), config.processing_timeout);

        Ok(Self {
            config,
            ingestor: Arc::new(ingestor),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn router(&self) -> Router {
        routes::router(AppState::new(Arc::clone(&self.ingestor)))
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            dir = %self.config.photos_dir.display(),
            "server listening"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("server stopped");
        Ok(())
    }
}
