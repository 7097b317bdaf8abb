use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use super::Sink;
use crate::message::Sample;

#[inline]
fn default_path() -> String {
    "data.csv".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

/// Appends `timestamp,payload` lines to a file.
///
/// The file is opened for every sample and closed right after, so nothing is
/// held between polls. Payloads are written verbatim: a comma or newline in
/// the payload makes the line ambiguous.
pub struct FileSink {
    path: String,
}

impl FileSink {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Fail at startup rather than on the first sample
        open_append(&config.path)
            .await
            .with_context(|| format!("failed to open file {}", config.path))?;
        Ok(Self { path: config.path })
    }
}

async fn open_append(path: impl AsRef<Path>) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(true)
        .open(path)
        .await
}

#[async_trait]
impl Sink for FileSink {
    async fn update(&mut self, sample: &Sample) -> anyhow::Result<()> {
        let line = format!("{},{}\n", sample.formatted_timestamp(), sample.payload);
        debug!("writing contents {:?} to {}", line, self.path);

        let mut file = open_append(&self.path)
            .await
            .with_context(|| format!("failed to open file {}", self.path))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to file {}", self.path))?;
        file.flush()
            .await
            .with_context(|| format!("failed to flush file {}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    fn sink_in(dir: &tempfile::TempDir) -> Config {
        Config {
            path: dir.path().join("data.csv").to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_sample_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = sink_in(&dir);
        let mut sink = FileSink::new(config.clone()).await.unwrap();

        let samples: Vec<_> = ["41.0", "42.5", "43.75"]
            .iter()
            .map(|p| Sample::new(Local::now(), p.to_string()))
            .collect();
        for sample in &samples {
            sink.update(sample).await.unwrap();
        }

        let contents = std::fs::read_to_string(&config.path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), samples.len());
        for (line, sample) in lines.iter().zip(&samples) {
            assert_eq!(
                *line,
                format!("{},{}", sample.formatted_timestamp(), sample.payload)
            );
        }
        assert!(contents.ends_with(",43.75\n"));
    }

    #[tokio::test]
    async fn keeps_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let config = sink_in(&dir);
        std::fs::write(&config.path, "2023-01-01 00:00:00.000000,10.0\n").unwrap();

        let mut sink = FileSink::new(config.clone()).await.unwrap();
        sink.update(&Sample::new(Local::now(), "42.5".to_string()))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&config.path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "2023-01-01 00:00:00.000000,10.0");
        assert!(lines[1].ends_with(",42.5"));
    }

    #[tokio::test]
    async fn unwritable_path_fails_at_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            path: dir
                .path()
                .join("missing")
                .join("data.csv")
                .to_string_lossy()
                .into_owned(),
        };
        assert!(FileSink::new(config).await.is_err());
    }
}
