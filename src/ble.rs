use std::{collections::HashSet, hash::Hash, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use btleplug::{
    api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter},
    platform::{Adapter, Manager, Peripheral},
};
use futures::{future, Stream, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::radio::{Advertisement, Error, Link, Radio};

async fn get_central(manager: &Manager) -> Result<Adapter, Error> {
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| Error::Other(e, "listing adapters", "host".to_string()))?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// [`Radio`] backed by the first Bluetooth adapter of the host.
pub struct BleRadio {
    _manager: Manager,
    central: Adapter,
}

impl BleRadio {
    pub async fn new() -> anyhow::Result<Self> {
        let manager = Manager::new()
            .await
            .context("fail to initialize Bluetooth manager")?;
        let central = get_central(&manager)
            .await
            .context("fail to acquire Bluetooth adapter")?;
        match central.adapter_info().await {
            Ok(info) => info!("using bluetooth adapter {}", info),
            Err(e) => debug!("adapter info unavailable: {}", e),
        }
        Ok(Self {
            _manager: manager,
            central,
        })
    }
}

async fn advertisement(peripheral: &Peripheral) -> Option<Advertisement<Peripheral>> {
    match peripheral.properties().await {
        Ok(Some(properties)) => Some(Advertisement {
            name: properties.local_name,
            address: properties.address,
            handle: peripheral.clone(),
        }),
        Ok(None) => None,
        Err(e) => {
            debug!(
                "properties of {} unavailable: {}",
                peripheral.address(),
                e
            );
            None
        }
    }
}

/// Keys of the `events` that arrive before `window` elapses.
///
/// Waits out the whole window even if the stream ends early.
async fn seen_during<S, K, F>(mut events: S, window: Duration, mut key: F) -> HashSet<K>
where
    S: Stream + Unpin,
    K: Eq + Hash,
    F: FnMut(S::Item) -> Option<K>,
{
    let mut seen = HashSet::new();
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(event) => seen.extend(key(event)),
                None => {
                    (&mut deadline).await;
                    break;
                }
            },
        }
    }
    seen
}

#[async_trait]
impl Radio for BleRadio {
    type Handle = Peripheral;
    type Link = BleLink;

    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement<Peripheral>>, Error> {
        debug!("scanning for {:?}", window);
        let events = self
            .central
            .events()
            .await
            .map_err(|e| Error::Other(e, "subscribing to events", "adapter".to_string()))?;
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::Other(e, "starting scan", "adapter".to_string()))?;
        // The adapter caches peripherals across scans, keep only those heard now
        let heard = seen_during(events, window, |event| match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ManufacturerDataAdvertisement { id, .. }
            | CentralEvent::ServiceDataAdvertisement { id, .. }
            | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
            _ => None,
        })
        .await;

        let peripherals = self.central.peripherals().await;
        if let Err(e) = self.central.stop_scan().await {
            warn!("failed to stop scanning: {}", e);
        }
        let peripherals = peripherals
            .map_err(|e| Error::Other(e, "listing peripherals", "adapter".to_string()))?;

        let fresh = peripherals.iter().filter(|p| heard.contains(&p.id()));
        let found: Vec<_> = future::join_all(fresh.map(advertisement))
            .await
            .into_iter()
            .flatten()
            .collect();
        debug!("{} device(s) discovered", found.len());
        Ok(found)
    }

    async fn connect(&mut self, target: &Advertisement<Peripheral>) -> Result<BleLink, Error> {
        let device = target.describe();
        let peripheral = target.handle.clone();

        peripheral
            .connect()
            .await
            .map_err(|e| Error::FailedToConnect(e, device.clone()))?;
        debug!("connected to {}", device);

        let mut link = BleLink { peripheral, device };
        if let Err(e) = link.peripheral.discover_services().await {
            // Do not leave the peripheral connected if the link is never handed out
            link.disconnect().await.ok();
            return Err(Error::Other(e, "discovering services", link.device));
        }
        Ok(link)
    }
}

pub struct BleLink {
    peripheral: Peripheral,
    device: String,
}

#[async_trait]
impl Link for BleLink {
    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>, Error> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic, self.device.clone()))?;
        let value = self
            .peripheral
            .read(&target)
            .await
            .map_err(|e| Error::Other(e, "reading characteristic", self.device.clone()))?;
        debug!("received {:x?} from {}", value, self.device);
        Ok(value)
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        let connected = self
            .peripheral
            .is_connected()
            .await
            .map_err(|e| Error::Other(e, "querying connection", self.device.clone()))?;
        if connected {
            debug!("disconnecting from {}", self.device);
            self.peripheral
                .disconnect()
                .await
                .map_err(|e| Error::Other(e, "disconnecting", self.device.clone()))?;
        }
        Ok(())
    }
}
