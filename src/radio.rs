use std::{string::FromUtf8Error, time::Duration};

use async_trait::async_trait;
use btleplug::api::BDAddr;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot find bluetooth adapter")]
    NoAdapter,
    #[error("bluetooth device `{0}` not found")]
    DeviceNotFound(String),
    #[error("fail to connect to device `{1}`: {0}")]
    FailedToConnect(btleplug::Error, String),
    #[error("characteristic {0} not found on device `{1}`")]
    CharacteristicNotFound(Uuid, String),
    #[error("{0} on device `{1}` timed-out")]
    RequestTimeout(&'static str, String),
    #[error("invalid UTF-8 payload from device `{0}`: {1}")]
    InvalidPayload(String, #[source] FromUtf8Error),
    #[error("failed to deliver sample: {0:#}")]
    Sink(anyhow::Error),
    #[error("error during bluetooth operation on `{2}` when {1}: {0}")]
    Other(btleplug::Error, &'static str, String),
}

impl Error {
    /// Whether retrying can never succeed without outside intervention.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::NoAdapter => true,
            Error::FailedToConnect(e, _) | Error::Other(e, _, _) => matches!(
                e,
                btleplug::Error::PermissionDenied | btleplug::Error::NotSupported(_)
            ),
            _ => false,
        }
    }
}

/// A device seen during one advertisement scan.
///
/// `handle` is whatever the radio needs to connect to it later and is only
/// meaningful within the scan that produced it.
#[derive(Debug, Clone)]
pub struct Advertisement<H> {
    pub name: Option<String>,
    pub address: BDAddr,
    pub handle: H,
}

impl<H> Advertisement<H> {
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.address),
            None => self.address.to_string(),
        }
    }
}

#[async_trait]
pub trait Radio: Send {
    type Handle: Send + Sync;
    type Link: Link;

    /// Scans for `window` and returns every device seen.
    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement<Self::Handle>>, Error>;

    async fn connect(
        &mut self,
        target: &Advertisement<Self::Handle>,
    ) -> Result<Self::Link, Error>;
}

/// An open connection to a peripheral.
#[async_trait]
pub trait Link: Send {
    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>, Error>;

    async fn disconnect(&mut self) -> Result<(), Error>;
}
