//! BlueZ GATT peripheral
//!
//! Serves the dashboard service over the host's default adapter using
//! `bluer`. Every callback from BlueZ is turned into a [`LinkEvent`] and
//! pushed into the control loop's queue.
//!
//! Connection state follows the centrals that wrote to the service. A
//! central's first write queues Connected ahead of the write itself, and
//! Disconnected is queued once the last of them drops off the adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic as GattCharacteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod,
    Service,
};
use bluer::{Adapter, Address, Session, Uuid};
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::centrals::CentralRegistry;
use super::{Characteristic, EventSender, GattLink, LinkEvent, SERVICE_UUID};
use crate::can::protocol::MAX_NOTIFICATION_SIZE;
use crate::error::{BridgeError, Result};

/// How often known centrals are checked for a live connection
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Notifications queued towards the notify task
const NOTIFY_QUEUE_DEPTH: usize = 4;

type NotifierSlot = Arc<Mutex<Option<CharacteristicNotifier>>>;

type Centrals = Arc<StdMutex<CentralRegistry<Address>>>;

fn lock(centrals: &Centrals) -> MutexGuard<'_, CentralRegistry<Address>> {
    centrals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn parse_uuid(uuid: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid).map_err(|e| BridgeError::Ble(format!("Invalid UUID {}: {}", uuid, e)))
}

/// Dashboard peripheral on the default BlueZ adapter
pub struct BluezPeripheral {
    _session: Session,
    adapter: Adapter,
    device_name: String,
    service_uuid: Uuid,
    _application: ApplicationHandle,
    advertisement: Option<AdvertisementHandle>,
    notify_tx: mpsc::Sender<Vec<u8>>,
    subscribed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BluezPeripheral {
    /// Power the adapter, register the GATT application and start advertising
    pub async fn start(device_name: &str, events: EventSender) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("BLE adapter {} ({})", adapter.name(), adapter.address().await?);

        let service_uuid = parse_uuid(SERVICE_UUID)?;
        let slot: NotifierSlot = Arc::new(Mutex::new(None));
        let subscribed = Arc::new(AtomicBool::new(false));
        let centrals: Centrals = Arc::new(StdMutex::new(CentralRegistry::new()));

        let characteristics = Characteristic::ALL
            .into_iter()
            .map(|characteristic| {
                if characteristic.is_writable() {
                    write_characteristic(characteristic, events.clone(), centrals.clone())
                } else {
                    notify_characteristic(characteristic, slot.clone(), subscribed.clone())
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let application = Application {
            services: vec![Service {
                uuid: service_uuid,
                primary: true,
                characteristics,
                ..Default::default()
            }],
            ..Default::default()
        };
        let application = adapter.serve_gatt_application(application).await?;

        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
        let tasks = vec![
            tokio::spawn(notify_task(notify_rx, slot, subscribed.clone())),
            tokio::spawn(watch_connections(adapter.clone(), centrals, events)),
        ];

        let mut peripheral = Self {
            _session: session,
            adapter,
            device_name: device_name.to_string(),
            service_uuid,
            _application: application,
            advertisement: None,
            notify_tx,
            subscribed,
            tasks,
        };
        peripheral.advertise().await?;
        info!("BLE advertising as \"{}\"", peripheral.device_name);

        Ok(peripheral)
    }

    async fn advertise(&mut self) -> Result<()> {
        // BlueZ refuses a second registration while the old handle is alive
        self.advertisement = None;

        let advertisement = Advertisement {
            service_uuids: [self.service_uuid].into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(self.device_name.clone()),
            ..Default::default()
        };
        self.advertisement = Some(self.adapter.advertise(advertisement).await?);
        Ok(())
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl GattLink for BluezPeripheral {
    fn can_notify(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    fn notify(&mut self, payload: &[u8]) -> bool {
        if payload.len() > MAX_NOTIFICATION_SIZE {
            warn!("Notification of {} bytes exceeds {}", payload.len(), MAX_NOTIFICATION_SIZE);
            return false;
        }
        self.notify_tx.try_send(payload.to_vec()).is_ok()
    }

    async fn restart_advertising(&mut self) -> Result<()> {
        self.advertise().await
    }
}

fn write_characteristic(
    characteristic: Characteristic,
    events: EventSender,
    centrals: Centrals,
) -> Result<GattCharacteristic> {
    Ok(GattCharacteristic {
        uuid: parse_uuid(characteristic.uuid())?,
        write: Some(CharacteristicWrite {
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, request| {
                let events = events.clone();
                let centrals = centrals.clone();
                async move {
                    let address = request.device_address;
                    let first = lock(&centrals).observe(address);
                    if first {
                        debug!("BLE central {} joined", address);
                        if !events.push(LinkEvent::Connected) {
                            lock(&centrals).forget(address);
                        }
                    }
                    events.push_write(characteristic, &value);
                    Ok(())
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn notify_characteristic(
    characteristic: Characteristic,
    slot: NotifierSlot,
    subscribed: Arc<AtomicBool>,
) -> Result<GattCharacteristic> {
    Ok(GattCharacteristic {
        uuid: parse_uuid(characteristic.uuid())?,
        notify: Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                let slot = slot.clone();
                let subscribed = subscribed.clone();
                async move {
                    debug!("BLE central subscribed to variable data");
                    *slot.lock().await = Some(notifier);
                    subscribed.store(true, Ordering::Release);
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    })
}

async fn notify_task(mut rx: mpsc::Receiver<Vec<u8>>, slot: NotifierSlot, subscribed: Arc<AtomicBool>) {
    while let Some(payload) = rx.recv().await {
        let mut guard = slot.lock().await;
        let Some(notifier) = guard.as_mut() else {
            continue;
        };

        let delivered = !notifier.is_stopped() && notifier.notify(payload).await.is_ok();
        if !delivered {
            debug!("BLE subscriber gone, releasing notify handle");
            *guard = None;
            subscribed.store(false, Ordering::Release);
        }
    }
}

async fn watch_connections(adapter: Adapter, centrals: Centrals, events: EventSender) {
    let mut ticker = interval(CONNECTION_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let known = lock(&centrals).known();
        let mut gone = Vec::new();
        for address in known {
            let connected = match adapter.device(address) {
                Ok(device) => device.is_connected().await,
                Err(e) => Err(e),
            };
            match connected {
                Ok(true) => {}
                Ok(false) => gone.push(address),
                Err(e) => {
                    debug!("BLE central {} unavailable: {}", address, e);
                    gone.push(address);
                }
            }
        }

        {
            let mut registry = lock(&centrals);
            if registry.prune(&gone) && events.push(LinkEvent::Disconnected) {
                registry.disconnect_reported();
            }
        }
    }
}
