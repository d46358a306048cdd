//! MQTT ingress
//!
//! Owns the broker connection and turns every PUBLISH it receives into an
//! `IngressEvent` handed straight to the `Broadcaster`. Responsibilities:
//! - poll the rumqttc event loop in a dedicated task
//! - (re)subscribe every configured filter on each successful CONNACK
//! - report per-filter subscription outcomes from SUBACK packets
//! - survive connection errors; rumqttc reconnects on the next poll and we
//!   only add a capped exponential backoff between attempts
//!
//! Messages published while the broker connection is down are lost.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubAck, SubscribeReasonCode,
};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::MqttSettings;
use crate::ingress::{IngressEvent, TopicFilter};
use crate::utils::BridgeError;

/// How long `IngressHandle::shutdown` waits for the event loop to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Issues subscription requests to the broker.
///
/// Requests must not block: they are made from inside the event loop task,
/// which is the only thing draining the request queue.
pub trait SubscriptionRequester {
    fn request_subscription(&self, filter: &TopicFilter) -> Result<(), BridgeError>;
}

impl SubscriptionRequester for AsyncClient {
    fn request_subscription(&self, filter: &TopicFilter) -> Result<(), BridgeError> {
        self.try_subscribe(filter.as_str(), QoS::AtMostOnce)?;
        Ok(())
    }
}

/// Process-wide view of the broker connection state.
#[derive(Debug, Clone, Default)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Stores the new state and returns the previous one.
    fn set(&self, connected: bool) -> bool {
        self.0.swap(connected, Ordering::AcqRel)
    }
}

/// Correlates SUBSCRIBE packet ids with the filter they carry.
///
/// rumqttc emits `Outgoing::Subscribe(pkid)` in request order, so queued
/// filters are assigned packet ids first-in first-out.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    queued: VecDeque<TopicFilter>,
    in_flight: HashMap<u16, TopicFilter>,
}

impl SubscriptionTracker {
    pub fn requested(&mut self, filter: TopicFilter) {
        self.queued.push_back(filter);
    }

    pub fn sent(&mut self, pkid: u16) -> Option<&TopicFilter> {
        let filter = self.queued.pop_front()?;
        self.in_flight.insert(pkid, filter);
        self.in_flight.get(&pkid)
    }

    /// Resolves a SUBACK to its filter and whether the broker granted it.
    pub fn acknowledged(&mut self, suback: &SubAck) -> Option<(TopicFilter, bool)> {
        let filter = self.in_flight.remove(&suback.pkid)?;
        let granted = !suback.return_codes.is_empty()
            && suback
                .return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
        Some((filter, granted))
    }

    pub fn pending(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}

/// Whether the event loop keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.initial * 2_u32.pow(self.attempts.min(16));
        self.attempts = self.attempts.saturating_add(1);
        delay.min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Reacts to broker events; generic over the requester so it can be driven
/// without a live broker.
pub struct IngressSubscriber<R> {
    requester: R,
    filters: Vec<TopicFilter>,
    tracker: SubscriptionTracker,
    broadcaster: Arc<Broadcaster>,
    connectivity: Connectivity,
}

impl<R: SubscriptionRequester> IngressSubscriber<R> {
    pub fn new(requester: R, filters: Vec<TopicFilter>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            requester,
            filters,
            tracker: SubscriptionTracker::default(),
            broadcaster,
            connectivity: Connectivity::default(),
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.clone()
    }

    pub fn tracker(&self) -> &SubscriptionTracker {
        &self.tracker
    }

    pub fn handle_event(&mut self, event: Event) -> Flow {
        match event {
            Event::Incoming(Packet::ConnAck(ConnAck { code, session_present })) => {
                if code == ConnectReturnCode::Success {
                    self.on_connect(session_present);
                } else {
                    warn!(code = ?code, "broker rejected connection");
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.on_message(publish.topic, publish.payload);
            }
            Event::Incoming(Packet::SubAck(suback)) => self.on_suback(&suback),
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                if let Some(filter) = self.tracker.sent(pkid) {
                    debug!(pkid, filter = %filter, "subscribe sent");
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                info!("sent MQTT disconnect");
                self.connectivity.set(false);
                return Flow::Stop;
            }
            other => debug!(event = ?other, "MQTT event"),
        }
        Flow::Continue
    }

    /// Called for every successful CONNACK, including reconnects.
    pub fn on_connect(&mut self, session_present: bool) {
        self.connectivity.set(true);
        info!(session_present, "connected to MQTT broker");
        self.tracker.clear();
        self.subscribe_all();
    }

    /// Requests one subscription per filter. A failed request is logged
    /// and does not stop the others. Returns how many were requested.
    pub fn subscribe_all(&mut self) -> usize {
        let mut requested = 0;
        for filter in &self.filters {
            match self.requester.request_subscription(filter) {
                Ok(()) => {
                    self.tracker.requested(filter.clone());
                    requested += 1;
                }
                Err(e) => error!(filter = %filter, error = %e, "subscribe request failed"),
            }
        }
        requested
    }

    pub fn on_suback(&mut self, suback: &SubAck) {
        match self.tracker.acknowledged(suback) {
            Some((filter, true)) => info!(filter = %filter, "subscribed"),
            Some((filter, false)) => {
                error!(filter = %filter, codes = ?suback.return_codes, "subscription refused")
            }
            None => debug!(pkid = suback.pkid, "SUBACK for untracked subscription"),
        }
    }

    pub fn on_message(&self, topic: String, payload: Bytes) {
        self.broadcaster
            .on_ingress_event(IngressEvent::new(topic, payload));
    }

    pub fn on_error(&mut self, err: &dyn Display) {
        if self.connectivity.set(false) {
            warn!(error = %err, "lost connection to MQTT broker");
        } else {
            error!(error = %err, "MQTT connection error");
        }
    }
}

/// Keeps the ingress task alive; call `shutdown` to disconnect cleanly.
pub struct IngressHandle {
    client: AsyncClient,
    connectivity: Connectivity,
    task: JoinHandle<()>,
}

impl IngressHandle {
    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.clone()
    }

    /// Sends DISCONNECT and waits briefly for the event loop to stop.
    pub async fn shutdown(self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "failed to request MQTT disconnect");
        }
        let mut task = self.task;
        if time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("MQTT event loop did not stop in time, aborting");
            task.abort();
        }
    }
}

pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    options
}

/// Starts the broker connection. The returned handle owns the event loop
/// task; connecting and reconnecting happen inside it.
pub fn connect(
    settings: &MqttSettings,
    broadcaster: Arc<Broadcaster>,
) -> Result<IngressHandle, BridgeError> {
    let filters = settings
        .topics
        .iter()
        .map(TopicFilter::new)
        .collect::<Result<Vec<_>, _>>()?;

    let (client, event_loop) = AsyncClient::new(mqtt_options(settings), settings.event_loop_capacity);
    let subscriber = IngressSubscriber::new(client.clone(), filters, broadcaster);
    let connectivity = subscriber.connectivity();

    info!(host = %settings.host, port = settings.port, "connecting to MQTT broker");
    let task = tokio::spawn(run(event_loop, subscriber));

    Ok(IngressHandle {
        client,
        connectivity,
        task,
    })
}

async fn run(mut event_loop: EventLoop, mut subscriber: IngressSubscriber<AsyncClient>) {
    let mut backoff = Backoff::default();
    loop {
        match event_loop.poll().await {
            Ok(event) => {
                backoff.reset();
                if subscriber.handle_event(event) == Flow::Stop {
                    break;
                }
            }
            Err(err) => {
                subscriber.on_error(&err);
                let delay = backoff.next_delay();
                debug!(delay = ?delay, "retrying MQTT connection");
                time::sleep(delay).await;
            }
        }
    }
    info!("MQTT event loop terminated");
}
