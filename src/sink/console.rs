use std::io::{self, Write};

use anyhow::Context;
use async_trait::async_trait;

use super::Sink;
use crate::message::Sample;

/// Prints `timestamp => payload`, stdout unless told otherwise.
pub struct ConsoleSink<W = io::Stdout> {
    out: W,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleSink<W> {
    #[cfg(test)]
    fn with_writer(out: W) -> Self {
        Self { out }
    }

    fn print(&mut self, sample: &Sample) -> io::Result<()> {
        writeln!(
            self.out,
            "{} => {}",
            sample.formatted_timestamp(),
            sample.payload
        )?;
        self.out.flush()
    }
}

#[async_trait]
impl<W: Write + Send + Sync> Sink for ConsoleSink<W> {
    async fn update(&mut self, sample: &Sample) -> anyhow::Result<()> {
        self.print(sample).context("failed to write to stdout")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn prints_timestamp_arrow_payload() {
        let mut sink = ConsoleSink::with_writer(Vec::new());
        let first = Sample::new(Local::now(), "42.5".to_string());
        let second = Sample::new(Local::now(), "43.0".to_string());

        sink.update(&first).await.unwrap();
        sink.update(&second).await.unwrap();

        let printed = String::from_utf8(sink.out).unwrap();
        assert_eq!(
            printed,
            format!(
                "{} => 42.5\n{} => 43.0\n",
                first.formatted_timestamp(),
                second.formatted_timestamp()
            )
        );
    }

    #[tokio::test]
    async fn broken_stdout_is_an_error() {
        let mut sink = ConsoleSink::with_writer(ClosedPipe);
        let err = sink
            .update(&Sample::new(Local::now(), "42.5".to_string()))
            .await
            .unwrap_err();

        let io = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io.kind(), io::ErrorKind::BrokenPipe);
    }
}
