//! Shared application state.

use std::sync::Arc;

use audiodrop_core::{IdAllocator, RandomIdAllocator};

use crate::config::ServiceConfig;
use crate::gateway::DownloadGateway;
use crate::pipeline::ConversionPipeline;
use crate::retention::RetentionScheduler;
use crate::store::ArtifactStore;
use crate::transcoder::Transcoder;

/// Components shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: ArtifactStore,
    pub pipeline: Arc<ConversionPipeline>,
    pub gateway: Arc<DownloadGateway>,
    pub retention: RetentionScheduler,
}

impl AppState {
    /// Wires the components together with random artifact identifiers.
    pub fn new(config: ServiceConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        Self::with_allocator(config, transcoder, Arc::new(RandomIdAllocator))
    }

    pub fn with_allocator(
        config: ServiceConfig,
        transcoder: Arc<dyn Transcoder>,
        ids: Arc<dyn IdAllocator>,
    ) -> Self {
        let store = ArtifactStore::new(config.storage_dir.clone());
        let retention = RetentionScheduler::new(store.clone(), config.retention);
        let pipeline = ConversionPipeline::new(
            store.clone(),
            transcoder,
            retention.clone(),
            ids,
            config.allowed_extensions.clone(),
        );
        let gateway = DownloadGateway::new(store.clone(), config.max_download_bytes);

        Self {
            config: Arc::new(config),
            store,
            pipeline: Arc::new(pipeline),
            gateway: Arc::new(gateway),
            retention,
        }
    }
}
