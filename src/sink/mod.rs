mod console;
mod file;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Sample;

#[async_trait]
pub trait Sink: Send + Sync {
    async fn update(&mut self, sample: &Sample) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum SinkConfig {
    Console,
    File(file::Config),
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::File(file::Config::default())
    }
}

impl SinkConfig {
    pub async fn into_sink(self) -> anyhow::Result<Box<dyn Sink>> {
        match self {
            SinkConfig::Console => Ok(Box::new(console::ConsoleSink::stdout())),
            SinkConfig::File(config) => Ok(Box::new(
                file::FileSink::new(config)
                    .await
                    .context("failed to create file sink")?,
            )),
        }
    }
}
