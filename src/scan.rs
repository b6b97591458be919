//! BlueZ D-Bus backend for ad-hoc scanning.
//!
//! Uses the `bluer` crate to talk to the BlueZ daemon. Discovery runs
//! unfiltered: every advertising device is reported, with follow-up
//! events whenever its RSSI or manufacturer data changes, so the deep
//! scan mode sees individual packets.

use crate::mac::MacAddress;
use crate::tracker::Advertisement;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start an unfiltered BLE scan on the default adapter.
///
/// Advertisements are sent through the returned channel, one per
/// discovery or property change. Runs until the receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // The discovery task owns all Bluetooth state; per-device watchers
    // end on their own when the receiver goes away.
    tokio::spawn(async move {
        let _session = session;
        let discover = match adapter.discover_devices().await {
            Ok(discover) => discover,
            Err(e) => {
                warn!(error = %e, "device discovery failed to start");
                return;
            }
        };
        futures::pin_mut!(discover);
        while let Some(event) = discover.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                let adapter = adapter.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = watch_device(&adapter, address, &tx).await;
                });
            }
        }
    });

    Ok(rx)
}

async fn snapshot(device: &Device, address: Address) -> Result<Advertisement, ScanError> {
    Ok(Advertisement {
        mac: MacAddress::from(address).to_string(),
        name: device.name().await?,
        rssi: device.rssi().await?,
        manufacturer_data: device
            .manufacturer_data()
            .await?
            .map(|data| data.into_iter().collect())
            .unwrap_or_default(),
    })
}

/// Send the device's current state, then one update per RSSI or
/// manufacturer-data change until the channel closes.
async fn watch_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Advertisement>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;
    let mut events = device.events().await?;

    if tx.send(snapshot(&device, address).await?).await.is_err() {
        return Ok(());
    }
    while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
        if matches!(
            property,
            DeviceProperty::Rssi(_) | DeviceProperty::ManufacturerData(_)
        ) && tx.send(snapshot(&device, address).await?).await.is_err()
        {
            break;
        }
    }
    Ok(())
}
