//! `sorel run`: bridge the MQTT broker into the coordinator and stream
//! decoded datapoint changes to stdout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use secrecy::ExposeSecret;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sorel_core::{Coordinator, DeviceKey, GatewayEvent, ParsedTopic};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::config::{BrokerConfig, resolve_bridge};
use crate::error::CliError;
use crate::output;

const CLIENT_QUEUE: usize = 10;

type Message = (String, Vec<u8>);

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (mut broker, gateway) = resolve_bridge(global)?;
    if let Some(topic) = args.topic {
        broker.topic_filter = topic;
    }
    if let Some(client_id) = args.client_id {
        broker.client_id = client_id;
    }
    if args.tls {
        broker.tls = true;
    }
    let reconnect_delay =
        humantime::parse_duration(&args.reconnect_delay).map_err(|e| CliError::Validation {
            field: "reconnect-delay".into(),
            reason: e.to_string(),
        })?;

    let coordinator = Coordinator::new(gateway)?;

    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_events(
        coordinator.subscribe(),
        global.output.clone(),
        output::should_color(&global.color),
        global.quiet,
        cancel.clone(),
    ));

    let result = bridge(&coordinator, &broker, reconnect_delay).await;

    coordinator.shutdown().await;
    cancel.cancel();
    let _ = printer.await;
    result
}

fn mqtt_options(broker: &BrokerConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    opts.set_keep_alive(broker.keep_alive);
    if let Some((ref username, ref password)) = broker.credentials {
        opts.set_credentials(username, password.expose_secret());
    }
    if broker.tls {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

/// Drive the MQTT event loop until Ctrl-C. Connection errors are logged
/// and retried after `reconnect_delay`.
async fn bridge(
    coordinator: &Coordinator,
    broker: &BrokerConfig,
    reconnect_delay: Duration,
) -> Result<(), CliError> {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(broker), CLIENT_QUEUE);
    info!(
        host = %broker.host,
        port = broker.port,
        client_id = %broker.client_id,
        tls = broker.tls,
        "connecting to broker"
    );

    let mut router = Router::new(coordinator.clone());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                break;
            }

            notification = eventloop.poll() => match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %broker.topic_filter, "connected, subscribing");
                    coordinator.set_connected(true);
                    client
                        .subscribe(broker.topic_filter.as_str(), QoS::AtLeastOnce)
                        .await
                        .map_err(|e| CliError::Mqtt { message: e.to_string() })?;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    router.dispatch(publish.topic.clone(), publish.payload.to_vec());
                }
                Ok(_) => {}
                Err(e) => {
                    coordinator.set_connected(false);
                    warn!(
                        error = %e,
                        retry_in = %humantime::format_duration(reconnect_delay),
                        "broker connection error"
                    );
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("interrupted, shutting down");
                            break;
                        }
                        () = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            },
        }
    }

    router.close().await;

    coordinator.set_connected(false);
    let _ = client.disconnect().await;
    Ok(())
}

// ── Per-device routing ──────────────────────────────────────────────

/// Hands each message to its device's worker. Messages of one device are
/// handled in order; different devices proceed independently. Dispatch
/// never waits, so a device stuck on a metadata fetch cannot hold up the
/// MQTT event loop.
struct Router {
    coordinator: Coordinator,
    routes: HashMap<DeviceKey, mpsc::UnboundedSender<Message>>,
    workers: JoinSet<()>,
}

impl Router {
    fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            routes: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    fn dispatch(&mut self, topic: String, payload: Vec<u8>) {
        let Some(parsed) = ParsedTopic::parse(&topic) else {
            debug!(topic, "ignoring message on unrecognized topic");
            return;
        };
        let route = self
            .routes
            .entry(parsed.device_key())
            .or_insert_with(|| spawn_worker(self.coordinator.clone(), &mut self.workers));
        if route.send((topic, payload)).is_err() {
            warn!(device = %parsed.device_key(), "device worker stopped, message dropped");
        }
    }

    /// Stop accepting messages and let workers drain what they hold.
    async fn close(mut self) {
        self.routes.clear();
        while self.workers.join_next().await.is_some() {}
    }
}

fn spawn_worker(
    coordinator: Coordinator,
    workers: &mut JoinSet<()>,
) -> mpsc::UnboundedSender<Message> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    workers.spawn(async move {
        while let Some((topic, payload)) = rx.recv().await {
            coordinator.handle_message(&topic, &payload).await;
        }
    });
    tx
}

async fn print_events(
    mut events: broadcast::Receiver<Arc<GatewayEvent>>,
    format: OutputFormat,
    color: bool,
    quiet: bool,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Ok(event) => {
                    output::print_output(&output::render_event(&format, &event, color), quiet);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            // Pending events are printed before stopping.
            () = cancel.cancelled() => break,
        }
    }
}
