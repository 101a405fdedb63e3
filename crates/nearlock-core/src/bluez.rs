//! BlueZ radio backend (Linux, via `bluer`).
//!
//! [`BluezRadio::spawn`] drains the [`CentralCommand`]s produced by a
//! [`ChannelCentral`](crate::ChannelCentral) and reports every result as a
//! [`RadioEvent`] on the monitor's input channel. Each D-Bus operation runs on
//! its own task so a slow peripheral never stalls the others.
//!
//! BlueZ only refreshes a device's `RSSI` property while discovery runs, even
//! for connected devices. Discovery therefore outlives a `StopScan` for as
//! long as any link is open.

use std::collections::HashMap;
use std::pin::pin;
use std::time::Duration;

use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, AddressType, Device, DeviceEvent,
    DeviceProperty, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::radio::{
    Advertisement, BluetoothError, BluetoothResult, CentralCommand, DeviceInfoField, PeripheralId,
    RadioEvent, DEVICE_INFORMATION_SERVICE,
};
use crate::runtime::MonitorInput;

const APPLE_COMPANY_ID: u16 = 0x004C;

/// How often to poll for GATT service resolution after connecting.
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SERVICES_POLL_ATTEMPTS: usize = 20;

type Events = mpsc::Sender<MonitorInput>;

/// Default BlueZ adapter plus the session that keeps it alive.
pub struct BluezRadio {
    _session: Session,
    adapter: Adapter,
}

impl BluezRadio {
    /// Connect to `bluetoothd` and pick the default adapter.
    ///
    /// # Errors
    ///
    /// Fails when the D-Bus session cannot be opened or no adapter exists.
    pub async fn open() -> BluetoothResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| BluetoothError::AdapterNotFound)?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// Run the backend until the command channel closes.
    pub fn spawn(
        self,
        commands: mpsc::UnboundedReceiver<CentralCommand>,
        events: Events,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(commands, events))
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<CentralCommand>, events: Events) {
        let powered = self.adapter.is_powered().await.unwrap_or(false);
        emit(&events, RadioEvent::PowerChanged { powered }).await;
        let power_watch = tokio::spawn(watch_power(self.adapter.clone(), events.clone()));

        let mut scan: Option<JoinHandle<()>> = None;
        let mut scan_requested = false;
        let mut links: HashMap<PeripheralId, JoinHandle<()>> = HashMap::new();

        while let Some(command) = commands.recv().await {
            debug!(?command, "Radio command");
            links.retain(|_, task| !task.is_finished());
            match command {
                CentralCommand::StartScan => {
                    scan_requested = true;
                    if scan.as_ref().map_or(true, JoinHandle::is_finished) {
                        scan = Some(tokio::spawn(discover(self.adapter.clone(), events.clone())));
                    }
                }
                CentralCommand::StopScan => {
                    scan_requested = false;
                    if keep_discovery(scan_requested, links.len()) {
                        debug!(links = links.len(), "Keeping discovery for connected RSSI");
                    } else if let Some(task) = scan.take() {
                        task.abort();
                    }
                }
                CentralCommand::Connect(id) => match self.device(&id) {
                    Some(device) => {
                        let task = tokio::spawn(connect(device, id.clone(), events.clone()));
                        if let Some(previous) = links.insert(id, task) {
                            previous.abort();
                        }
                    }
                    None => emit(&events, RadioEvent::ConnectFailed(id)).await,
                },
                CentralCommand::CancelConnection(id) => {
                    if let Some(task) = links.remove(&id) {
                        task.abort();
                    }
                    if !keep_discovery(scan_requested, links.len()) {
                        if let Some(task) = scan.take() {
                            task.abort();
                        }
                    }
                    if let Some(device) = self.device(&id) {
                        tokio::spawn(async move {
                            if let Err(err) = device.disconnect().await {
                                debug!(%id, error = %err, "Disconnect failed");
                            }
                        });
                    }
                }
                CentralCommand::ReadRssi(id) => match self.device(&id) {
                    Some(device) => {
                        tokio::spawn(read_rssi(device, id, events.clone()));
                    }
                    None => emit(&events, RadioEvent::RssiRead { id, rssi: None }).await,
                },
                CentralCommand::DiscoverDeviceInformation(id) => {
                    if let Some(device) = self.device(&id) {
                        tokio::spawn(read_device_information(device, id, events.clone()));
                    }
                }
            }
        }

        debug!("Radio command channel closed");
        power_watch.abort();
        if let Some(task) = scan {
            task.abort();
        }
        for task in links.into_values() {
            task.abort();
        }
    }

    fn device(&self, id: &PeripheralId) -> Option<Device> {
        let address: Address = match id.as_str().parse() {
            Ok(address) => address,
            Err(_) => {
                warn!(%id, "Not a Bluetooth address");
                return None;
            }
        };
        match self.adapter.device(address) {
            Ok(device) => Some(device),
            Err(err) => {
                debug!(%id, error = %err, "Unknown device");
                None
            }
        }
    }
}

/// Whether discovery must run: requested by the monitor, or needed to keep
/// RSSI fresh on open links.
const fn keep_discovery(scan_requested: bool, open_links: usize) -> bool {
    scan_requested || open_links > 0
}

async fn emit(events: &Events, event: RadioEvent) {
    if events.send(event.into()).await.is_err() {
        debug!("Monitor is gone, dropping radio event");
    }
}

async fn watch_power(adapter: Adapter, events: Events) {
    let stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "Cannot watch adapter power state");
            return;
        }
    };
    let mut stream = pin!(stream);
    while let Some(event) = stream.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            emit(&events, RadioEvent::PowerChanged { powered }).await;
        }
    }
}

async fn discover(adapter: Adapter, events: Events) {
    if let Err(err) = discover_inner(&adapter, &events).await {
        warn!(error = %err, "Discovery stopped");
    }
}

async fn discover_inner(adapter: &Adapter, events: &Events) -> bluer::Result<()> {
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..DiscoveryFilter::default()
        })
        .await?;
    let stream = adapter.discover_devices_with_changes().await?;
    let mut stream = pin!(stream);
    info!("Discovery started");

    while let Some(event) = stream.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        match advertisement(adapter, address).await {
            Ok(Some(adv)) => {
                if events.send(RadioEvent::Advertisement(adv).into()).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => debug!(%address, error = %err, "Skipping device"),
        }
    }
    Ok(())
}

/// Build an advertisement from the device's cached properties. Devices
/// without an RSSI are only known from cache and are skipped.
async fn advertisement(adapter: &Adapter, address: Address) -> bluer::Result<Option<Advertisement>> {
    let device = adapter.device(address)?;
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };
    let mut adv = Advertisement::new(address.to_string(), rssi);
    adv.local_name = device.name().await?;
    if device.address_type().await? != AddressType::LeRandom {
        adv.address = Some(address.to_string());
    }
    adv.manufacturer_data = device
        .manufacturer_data()
        .await?
        .and_then(|data| manufacturer_payload(&data));
    adv.service_uuids = device
        .uuids()
        .await?
        .unwrap_or_default()
        .into_iter()
        .collect();
    Ok(Some(adv))
}

/// Re-attach the little-endian company identifier BlueZ strips off,
/// preferring Apple's entry.
fn manufacturer_payload(data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (company, payload) = data
        .get_key_value(&APPLE_COMPANY_ID)
        .or_else(|| data.iter().min_by_key(|(company, _)| **company))?;
    let mut bytes = company.to_le_bytes().to_vec();
    bytes.extend_from_slice(payload);
    Some(bytes)
}

async fn connect(device: Device, id: PeripheralId, events: Events) {
    let already = device.is_connected().await.unwrap_or(false);
    if !already {
        if let Err(err) = device.connect().await {
            debug!(%id, error = %err, "Connect failed");
            emit(&events, RadioEvent::ConnectFailed(id)).await;
            return;
        }
    }
    emit(&events, RadioEvent::Connected(id.clone())).await;
    watch_link(&device, id, &events).await;
}

/// Follow a connected device until it disconnects.
async fn watch_link(device: &Device, id: PeripheralId, events: &Events) {
    let stream = match device.events().await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(%id, error = %err, "Cannot watch device");
            return;
        }
    };
    let mut stream = pin!(stream);
    let mut resolved_before = false;
    while let Some(DeviceEvent::PropertyChanged(property)) = stream.next().await {
        match property {
            DeviceProperty::Connected(false) => {
                emit(events, RadioEvent::Disconnected(id)).await;
                return;
            }
            DeviceProperty::ServicesResolved(true) => {
                if resolved_before {
                    emit(events, RadioEvent::ServicesInvalidated(id.clone())).await;
                }
                resolved_before = true;
            }
            _ => {}
        }
    }
}

/// Reads only succeed over a live link. Otherwise the cached advertisement
/// value would be reported as a connected reading.
async fn read_rssi(device: Device, id: PeripheralId, events: Events) {
    let rssi = match device.is_connected().await {
        Ok(true) => match device.rssi().await {
            Ok(rssi) => rssi,
            Err(err) => {
                debug!(%id, error = %err, "RSSI read failed");
                None
            }
        },
        Ok(false) => None,
        Err(err) => {
            debug!(%id, error = %err, "Connection state unavailable");
            None
        }
    };
    emit(&events, RadioEvent::RssiRead { id, rssi }).await;
}

async fn read_device_information(device: Device, id: PeripheralId, events: Events) {
    if let Err(err) = read_device_information_inner(&device, &id, &events).await {
        debug!(%id, error = %err, "Device Information read failed");
    }
}

async fn read_device_information_inner(
    device: &Device,
    id: &PeripheralId,
    events: &Events,
) -> bluer::Result<()> {
    for _ in 0..SERVICES_POLL_ATTEMPTS {
        if device.is_services_resolved().await? {
            break;
        }
        tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
    }

    for service in device.services().await? {
        if service.uuid().await? != DEVICE_INFORMATION_SERVICE {
            continue;
        }
        for characteristic in service.characteristics().await? {
            let Some(field) = DeviceInfoField::from_characteristic(&characteristic.uuid().await?)
            else {
                continue;
            };
            let value = characteristic.read().await?;
            emit(
                events,
                RadioEvent::CharacteristicRead {
                    id: id.clone(),
                    field,
                    value,
                },
            )
            .await;
        }
    }
    Ok(())
}
