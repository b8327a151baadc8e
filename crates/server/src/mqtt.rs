//! MQTT transport bootstrap and the broker-facing event loop: connects,
//! subscribes per the topic router (§4.10), and feeds classified inbound
//! messages into the device registry (§4.9).

use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::device::DeviceEvent;
use crate::registry::Registry;
use crate::router::{self, InboundEvent, Prefix};

const CLIENT_ID: &str = "plantprism-server";
const EVENT_LOOP_CAPACITY: usize = 100;

/// Builds the `MqttOptions`/client pair this process connects with. CA-cert
/// loading is the one piece of transport bootstrap in scope (§1): if a CA
/// path is configured, pin the broker connection to it; otherwise rumqttc's
/// default TLS configuration falls back to the platform's native roots.
pub fn connect(cfg: &Config) -> Result<(AsyncClient, EventLoop)> {
    let mut opts = MqttOptions::new(CLIENT_ID, &cfg.broker_host, cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_clean_session(false);

    if let (Some(user), Some(pass)) = (&cfg.broker_user, &cfg.broker_pass) {
        opts.set_credentials(user.clone(), pass.clone());
        info!("mqtt: using password authentication");
    } else {
        warn!("mqtt: no broker credentials configured");
    }

    if let Some(ca_path) = &cfg.broker_ca_path {
        let ca = std::fs::read(ca_path)
            .with_context(|| format!("failed to read CA certificate {}", ca_path.display()))?;
        opts.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
        info!(path = %ca_path.display(), "mqtt: pinned to configured CA certificate");
    }

    Ok(AsyncClient::new(opts, EVENT_LOOP_CAPACITY))
}

async fn subscribe_all(client: &AsyncClient) -> Result<()> {
    for filter in router::subscriptions() {
        client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribe to {filter}"))?;
    }
    Ok(())
}

/// Dispatches one classified inbound publish to the owning device, creating
/// it first if this is the first reference and it's allow-listed.
async fn dispatch(registry: &Registry, prefix: Prefix, device_id: String, event: InboundEvent, payload: Vec<u8>) {
    let handle = match registry.get_or_create(&device_id).await {
        Ok(h) => h,
        Err(e) => {
            warn!(device = %device_id, error = %e, "dropping message for unknown device");
            return;
        }
    };
    if handle
        .tx
        .send(DeviceEvent::Inbound { prefix, event, payload })
        .await
        .is_err()
    {
        error!(device = %device_id, "device queue closed, dropping message");
    }
}

/// Drives the MQTT event loop until the connection is closed or the process
/// is asked to stop. Re-subscribes on every reconnect since a broker may
/// not honour `clean_session(false)` across restarts.
pub async fn run(mut eventloop: EventLoop, client: AsyncClient, registry: Registry) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                if let Err(e) = subscribe_all(&client).await {
                    error!(error = %e, "failed to (re)subscribe after connect");
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let topic = p.topic.clone();
                match router::classify(&topic) {
                    Ok(Some(classified)) => {
                        dispatch(
                            &registry,
                            classified.prefix,
                            classified.device_id,
                            classified.event,
                            p.payload.to_vec(),
                        )
                        .await;
                    }
                    Ok(None) => {} // our own echo, ignore
                    Err(()) => {
                        error!(topic = %topic, "unrecognised mqtt topic");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt connection error, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
