use anyhow::Result;
use blob_store::BlobStorageConfig;
use bytes::Bytes;
use data_model::DatasetRecord;
use futures::stream;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ServerConfig, service::Service};

pub struct TestService {
    pub service: Service,
    // holds the storage directories for the lifetime of the test
    _temp_dir: tempfile::TempDir,
}

impl TestService {
    pub fn new() -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;
        let cfg = ServerConfig {
            state_store_path: temp_dir
                .path()
                .join("state_store")
                .to_str()
                .unwrap()
                .to_string(),
            blob_storage: BlobStorageConfig {
                path: Some(format!(
                    "file://{}",
                    temp_dir.path().join("blob_store").to_str().unwrap()
                )),
            },
            ..Default::default()
        };
        let service = Service::new(cfg)?;

        Ok(Self {
            service,
            _temp_dir: temp_dir,
        })
    }

    pub async fn upload(&self, name: &str, bytes: &'static [u8]) -> Result<DatasetRecord> {
        let record = self
            .service
            .inventory
            .upload(name, stream::iter(vec![Ok(Bytes::from_static(bytes))]))
            .await?;
        Ok(record)
    }
}
