use std::{fmt, time::Duration};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use tokio::{
    runtime::Handle,
    sync::broadcast,
    time::{sleep, timeout},
};
use uuid::Uuid;

use crate::{
    backoff::{jitter, Backoff},
    config::Config,
    message::{Sample, Timeline},
    radio::{Advertisement, Error, Link, Radio},
    sink::Sink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Scanning,
    Connecting,
    Reading,
    Sinking,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Scanning => "scanning",
            Phase::Connecting => "connecting",
            Phase::Reading => "reading",
            Phase::Sinking => "sinking",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PollerConfig {
    pub device_name: String,
    pub characteristic: Uuid,
    pub scan_duration: Duration,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub retry_min: Duration,
    pub retry_max: Duration,
    pub retry_backoff: u16,
}

impl From<&Config> for PollerConfig {
    fn from(config: &Config) -> Self {
        Self {
            device_name: config.device_name.clone(),
            characteristic: config.characteristic,
            scan_duration: config.scan_duration,
            request_timeout: config.request_timeout,
            poll_interval: config.poll_interval,
            retry_min: config.retry_min,
            retry_max: config.retry_max,
            retry_backoff: config.retry_backoff,
        }
    }
}

/// First advertisement whose name is exactly `name`.
pub(crate) fn select_target<'a, H>(
    found: &'a [Advertisement<H>],
    name: &str,
) -> Option<&'a Advertisement<H>> {
    found.iter().find(|ad| ad.name.as_deref() == Some(name))
}

/// Owns an open link for the duration of one cycle.
///
/// `release` disconnects in place. If the guard is dropped instead (the cycle
/// was cancelled mid-flight), the disconnect is handed to the runtime.
struct Connection<L: Link + 'static> {
    link: Option<L>,
    device: String,
    request_timeout: Duration,
}

impl<L: Link + 'static> Connection<L> {
    fn link(&mut self, doing: &'static str) -> Result<&mut L, Error> {
        let device = &self.device;
        self.link
            .as_mut()
            .ok_or_else(|| Error::Other(btleplug::Error::NotConnected, doing, device.clone()))
    }

    async fn release(mut self) {
        if let Some(mut link) = self.link.take() {
            match timeout(self.request_timeout, link.disconnect()).await {
                Ok(Ok(())) => debug!("disconnected from {}", self.device),
                Ok(Err(e)) => warn!("failed to disconnect from {}: {}", self.device, e),
                Err(_) => warn!("disconnecting from {} timed-out", self.device),
            }
        }
    }
}

impl<L: Link + 'static> Drop for Connection<L> {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!("cycle abandoned, disconnecting from {}", self.device);
            if let Ok(handle) = Handle::try_current() {
                handle.spawn(async move {
                    link.disconnect().await.ok();
                });
            }
        }
    }
}

type Clock = Box<dyn FnMut() -> DateTime<Local> + Send>;

pub(crate) struct Poller<R: Radio> {
    radio: R,
    config: PollerConfig,
    backoff: Backoff,
    phase: Phase,
    clock: Clock,
    timeline: Timeline,
}

impl<R> Poller<R>
where
    R: Radio,
    R::Link: 'static,
{
    pub fn new(radio: R, config: PollerConfig) -> Self {
        let backoff = Backoff::new(config.retry_min, config.retry_max, config.retry_backoff);
        Self {
            radio,
            config,
            backoff,
            phase: Phase::Scanning,
            clock: Box::new(Local::now),
            timeline: Timeline::default(),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: impl FnMut() -> DateTime<Local> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("{} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Polls until a fatal error or until `termination` fires.
    ///
    /// Transient failures are logged and retried after a backoff delay; they
    /// never leave this function.
    pub async fn run_forever<S: Sink + ?Sized>(
        &mut self,
        sink: &mut S,
        mut termination: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        info!(
            "polling characteristic {} of `{}`",
            self.config.characteristic, self.config.device_name
        );
        loop {
            let outcome = tokio::select! {
                outcome = self.cycle(sink) => outcome,
                _ = termination.recv() => break,
            };

            let delay = match outcome {
                Ok(sample) => {
                    info!("`{}` reported {}", self.config.device_name, sample.payload);
                    self.backoff.reset();
                    self.config.poll_interval
                }
                Err(e) if e.is_fatal() => {
                    error!("giving up polling: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = jitter(self.backoff.fail());
                    warn!(
                        "poll failed ({} in a row), retrying in {:?}: {}",
                        self.backoff.failures(),
                        delay,
                        e
                    );
                    delay
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = sleep(delay) => {},
                    _ = termination.recv() => break,
                }
            }
        }
        info!("poller stopped");
        Ok(())
    }

    /// One discover, connect, read and sink attempt.
    ///
    /// Always ends back in [`Phase::Scanning`], with the link released.
    pub async fn cycle<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<Sample, Error> {
        let result = self.attempt(sink).await;
        if let Err(e) = &result {
            debug!("cycle failed while {}: {}", self.phase, e);
        }
        self.enter(Phase::Scanning);
        result
    }

    async fn attempt<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<Sample, Error> {
        self.enter(Phase::Scanning);
        let found = self.radio.scan(self.config.scan_duration).await?;
        let target = select_target(&found, &self.config.device_name)
            .ok_or_else(|| Error::DeviceNotFound(self.config.device_name.clone()))?;
        let device = target.describe();

        info!("connecting to {}", device);
        self.enter(Phase::Connecting);
        let link = timeout(self.config.request_timeout, self.radio.connect(target))
            .await
            .map_err(|_| Error::RequestTimeout("connecting", device.clone()))??;
        let mut connection = Connection {
            link: Some(link),
            device,
            request_timeout: self.config.request_timeout,
        };

        let outcome = self.exchange(&mut connection, sink).await;
        connection.release().await;
        outcome
    }

    async fn exchange<S: Sink + ?Sized>(
        &mut self,
        connection: &mut Connection<R::Link>,
        sink: &mut S,
    ) -> Result<Sample, Error> {
        self.enter(Phase::Reading);
        let raw = timeout(
            self.config.request_timeout,
            connection
                .link("reading characteristic")?
                .read(self.config.characteristic),
        )
        .await
        .map_err(|_| Error::RequestTimeout("reading", connection.device.clone()))??;
        let payload = String::from_utf8(raw)
            .map_err(|e| Error::InvalidPayload(connection.device.clone(), e))?;
        let sample = Sample::new(self.timeline.stamp((self.clock)()), payload);

        self.enter(Phase::Sinking);
        sink.update(&sample).await.map_err(Error::Sink)?;
        Ok(sample)
    }
}
