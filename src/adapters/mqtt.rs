//! MQTT broker client.
//!
//! Implements [`BrokerPort`] over `EspMqttClient`.  The client's event
//! callback runs on the IDF MQTT task; it only flips the connected flag and
//! queues complete inbound messages, which the main loop drains through
//! [`BrokerPort::poll`].  Partial (chunked) deliveries are dropped since the
//! command payloads are all well under one buffer.
//!
//! The inbox outlives any one session: a command that arrived before a
//! teardown is still handed out by the next poll.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::app::ports::{BrokerPort, InboundMessage, SessionParams};
use crate::error::NetworkError;

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EventPayload, LwtConfiguration, MqttClientConfiguration, QoS,
};

/// Inbound messages held between loop iterations; older ones are dropped.
const INBOX_DEPTH: usize = 8;

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    inbox: Mutex<VecDeque<InboundMessage>>,
}

impl Shared {
    fn enqueue(&self, msg: InboundMessage) {
        if let Ok(mut q) = self.inbox.lock() {
            if q.len() == INBOX_DEPTH {
                q.pop_front();
                warn!("MQTT: inbox full, dropped oldest message");
            }
            q.push_back(msg);
        }
    }
}

pub struct MqttBroker {
    shared: Arc<Shared>,
    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    pub sim_published: Vec<(String, Vec<u8>, bool)>,
    #[cfg(not(target_os = "espidf"))]
    pub sim_subscriptions: Vec<String>,
}

impl MqttBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            sim_published: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_subscriptions: Vec::new(),
        }
    }

    /// Simulation: deliver a message as if the broker had sent it.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_deliver(&self, topic: &str, payload: &[u8]) {
        self.shared.enqueue(InboundMessage { topic: topic.to_owned(), payload: payload.to_vec() });
    }

    /// Simulation: the broker dropped the session.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_session(&self) {
        self.shared.connected.store(false, Ordering::Relaxed);
    }
}

impl Default for MqttBroker {
    fn default() -> Self {
        Self::new()
    }
}

pub fn broker_url(params: &SessionParams<'_>) -> String {
    let scheme = if params.use_tls { "mqtts" } else { "mqtt" };
    format!("{}://{}:{}", scheme, params.host, params.port)
}

impl BrokerPort for MqttBroker {
    #[cfg(target_os = "espidf")]
    fn connect(&mut self, params: &SessionParams<'_>) -> Result<(), NetworkError> {
        use core::time::Duration;
        use esp_idf_svc::hal::delay::FreeRtos;

        self.disconnect();
        let url = broker_url(params);
        let conf = MqttClientConfiguration {
            client_id: Some(params.client_id),
            username: params.username,
            password: params.password,
            keep_alive_interval: Some(Duration::from_secs(u64::from(params.keepalive_secs))),
            buffer_size: params.buffer_size,
            network_timeout: Duration::from_millis(u64::from(params.connect_timeout_ms)),
            lwt: Some(LwtConfiguration {
                topic: params.will_topic,
                payload: params.will_payload.as_bytes(),
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
            crt_bundle_attach: if params.use_tls { Some(esp_idf_svc::sys::esp_crt_bundle_attach) } else { None },
            ..Default::default()
        };

        let shared = Arc::clone(&self.shared);
        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => shared.connected.store(true, Ordering::Relaxed),
            EventPayload::Disconnected => shared.connected.store(false, Ordering::Relaxed),
            EventPayload::Received { topic: Some(topic), data, details: Details::Complete, .. } => {
                shared.enqueue(InboundMessage { topic: topic.to_owned(), payload: data.to_vec() });
            }
            EventPayload::Error(e) => warn!("MQTT: client error {:?}", e),
            _ => {}
        })
        .map_err(|e| {
            warn!("MQTT: client init failed: {}", e);
            NetworkError::BrokerRefused
        })?;
        self.client = Some(client);

        info!("MQTT: connecting to {} as {}", url, params.client_id);
        let mut waited = 0;
        while !self.shared.connected.load(Ordering::Relaxed) {
            if waited >= params.connect_timeout_ms {
                self.client = None;
                return Err(NetworkError::ConnectTimeout);
            }
            FreeRtos::delay_ms(50);
            waited += 50;
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn connect(&mut self, params: &SessionParams<'_>) -> Result<(), NetworkError> {
        if params.host.is_empty() {
            return Err(NetworkError::NotConfigured);
        }
        info!("MQTT(sim): session to {} as {}", broker_url(params), params.client_id);
        self.shared.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn disconnect(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            // Dropping the client stops its task and closes the socket.
            self.client = None;
        }
        self.shared.connected.store(false, Ordering::Relaxed);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), NetworkError> {
        #[cfg(target_os = "espidf")]
        {
            let client = self.client.as_mut().ok_or(NetworkError::NotConnected)?;
            client.subscribe(topic, QoS::AtMostOnce).map(|_| ()).map_err(|e| {
                warn!("MQTT: subscribe {} failed: {}", topic, e);
                NetworkError::NotConnected
            })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_subscriptions.push(topic.to_owned());
            Ok(())
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }

        #[cfg(target_os = "espidf")]
        {
            let client = self.client.as_mut().ok_or(NetworkError::NotConnected)?;
            client.publish(topic, QoS::AtMostOnce, retain, payload).map(|_| ()).map_err(|e| {
                warn!("MQTT: publish to {} failed: {}", topic, e);
                NetworkError::PublishFailed
            })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_published.push((topic.to_owned(), payload.to_vec(), retain));
            Ok(())
        }
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.shared.inbox.lock().ok()?.pop_front()
    }
}
