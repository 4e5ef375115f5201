//! Two-node demo session over the loopback medium
//!
//! A receiver advertises, a sender discovers it, both sides accept the
//! connection, the sender streams a payload and finally disconnects. Every
//! event either node publishes is printed as it happens.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use nearby_core::{
    BytesSource, EndpointId, FileSource, NearbyEvent, PayloadId, PayloadSource, PayloadTransfer,
    TransferStatus,
};
use nearby_harness::{LoopbackMedium, LoopbackProvider};
use nearby_runtime::{EventSubscription, NearbyBuilder, NearbyConnections};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::CliConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Demo Options and Report
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// File to send, random bytes when `None`
    pub file: Option<PathBuf>,
    /// Size of the random payload
    pub size: usize,
    /// Print events as JSON lines
    pub json: bool,
}

/// Outcome of a demo session
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub payload_id: PayloadId,
    pub bytes_sent: u64,
    pub bytes_received: usize,
    pub status: TransferStatus,
    pub elapsed_ms: u128,
}

// ----------------------------------------------------------------------------
// Node
// ----------------------------------------------------------------------------

struct Node {
    label: &'static str,
    nearby: NearbyConnections<LoopbackProvider>,
    events: EventSubscription,
    id: EndpointId,
    printer: JoinHandle<()>,
}

impl Node {
    fn start(label: &'static str, medium: &LoopbackMedium, config: &CliConfig, json: bool) -> Result<Self> {
        let (provider, notifications) = medium.attach();
        let id = provider.local_id().clone();
        let nearby = NearbyBuilder::new()
            .with_config(config.nearby.clone())
            .start(provider, notifications)?;

        let printer = tokio::spawn(print_events(label, nearby.subscribe(), json));
        let events = nearby.subscribe();
        debug!("{} node attached as {}", label, id);

        Ok(Self {
            label,
            nearby,
            events,
            id,
            printer,
        })
    }

    /// Skip events until one matches, bounded by `limit`
    async fn wait_for<F>(&mut self, what: &str, limit: Duration, mut matches: F) -> Result<NearbyEvent>
    where
        F: FnMut(&NearbyEvent) -> bool,
    {
        let events = &mut self.events;
        let waited = timeout(limit, async {
            while let Some(event) = events.recv().await {
                if matches(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match waited {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(CliError::Demo(format!("{}: event stream closed", self.label))),
            Err(_) => Err(CliError::Demo(format!(
                "{}: timed out waiting for {}",
                self.label, what
            ))),
        }
    }

    async fn wait_for_finished_transfer(&mut self, limit: Duration) -> Result<PayloadTransfer> {
        let event = self
            .wait_for("transfer to finish", limit, |event| {
                matches!(event, NearbyEvent::TransferUpdate(transfer) if transfer.is_terminal())
            })
            .await?;
        match event {
            NearbyEvent::TransferUpdate(transfer) => Ok(transfer),
            other => Err(CliError::Demo(format!("unexpected event {}", other.kind()))),
        }
    }

    async fn stop(self) {
        self.nearby.shutdown().await;
        // Let the printer drain what shutdown published
        tokio::task::yield_now().await;
        self.printer.abort();
    }
}

async fn print_events(label: &'static str, mut events: EventSubscription, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{{\"node\":\"{}\",\"event\":{}}}", label, line),
                Err(err) => debug!("Failed to encode event: {}", err),
            }
        } else {
            println!("[{}] {}", label, describe(&event));
        }
    }
}

fn describe(event: &NearbyEvent) -> String {
    match event {
        NearbyEvent::EndpointDiscovered {
            endpoint_id,
            display_name,
        } => format!("discovered {} ({})", endpoint_id, display_name),
        NearbyEvent::EndpointLost { endpoint_id } => format!("lost {}", endpoint_id),
        NearbyEvent::ConnectionInitiated {
            endpoint_id,
            peer_name,
            direction,
        } => format!(
            "{} connection with {} ({})",
            direction,
            endpoint_id,
            peer_name.as_deref().unwrap_or("unknown")
        ),
        NearbyEvent::ConnectionResult {
            endpoint_id,
            success: true,
            ..
        } => format!("connected to {}", endpoint_id),
        NearbyEvent::ConnectionResult {
            endpoint_id,
            reason,
            ..
        } => format!(
            "connection to {} failed: {}",
            endpoint_id,
            reason.as_ref().map(ToString::to_string).unwrap_or_default()
        ),
        NearbyEvent::Disconnected { endpoint_id } => format!("disconnected from {}", endpoint_id),
        NearbyEvent::TransferUpdate(transfer) => {
            let percent = transfer
                .progress()
                .map(|fraction| format!("{:.0}%", fraction * 100.0))
                .unwrap_or_else(|| "?".to_string());
            format!(
                "{} payload {} with {}: {} bytes ({}) {:?}",
                transfer.direction,
                transfer.payload_id,
                transfer.endpoint_id,
                transfer.bytes_transferred,
                percent,
                transfer.status
            )
        }
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Run the full demo session
pub async fn run_demo(config: &CliConfig, options: &DemoOptions) -> Result<DemoReport> {
    config.validate()?;
    let limit = Duration::from_secs(config.step_timeout_secs);
    let started = Instant::now();

    let medium = LoopbackMedium::new(config.chunk_size);
    let mut receiver = Node::start("receiver", &medium, config, options.json)?;
    let mut sender = Node::start("sender", &medium, config, options.json)?;

    // Discovery
    receiver
        .nearby
        .start_advertising(&config.receiver_name)
        .await?;
    sender.nearby.start_discovery().await?;
    let receiver_id = receiver.id.clone();
    sender
        .wait_for("receiver to be discovered", limit, |event| {
            matches!(event, NearbyEvent::EndpointDiscovered { endpoint_id, .. } if endpoint_id == &receiver_id)
        })
        .await?;

    // Connection
    sender
        .nearby
        .request_connection(&receiver.id, &config.sender_name)
        .await?;
    receiver
        .wait_for("incoming connection", limit, |event| {
            matches!(event, NearbyEvent::ConnectionInitiated { .. })
        })
        .await?;
    receiver.nearby.accept_connection(&sender.id).await?;
    sender.nearby.accept_connection(&receiver.id).await?;

    for node in [&mut sender, &mut receiver] {
        let result = node
            .wait_for("connection result", limit, |event| {
                matches!(event, NearbyEvent::ConnectionResult { .. })
            })
            .await?;
        if let NearbyEvent::ConnectionResult {
            success: false,
            reason,
            ..
        } = result
        {
            return Err(CliError::Demo(format!(
                "connection refused: {}",
                reason.map(|r| r.to_string()).unwrap_or_default()
            )));
        }
    }

    // Transfer
    let payload_id = match &options.file {
        Some(path) => {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "payload".to_string());
            send(&sender, &receiver.id, &FileSource::new(path), &name).await?
        }
        None => {
            let bytes: Vec<u8> = std::iter::repeat_with(|| fastrand::u8(..))
                .take(options.size)
                .collect();
            send(&sender, &receiver.id, &BytesSource::new(bytes), "random.bin").await?
        }
    };

    let sent = sender.wait_for_finished_transfer(limit).await?;
    let received = receiver.wait_for_finished_transfer(limit).await?;
    let bytes_received = receiver
        .nearby
        .provider()
        .received(&sender.id, &payload_id)
        .map(|bytes| bytes.len())
        .unwrap_or(0);

    // Teardown
    sender.nearby.disconnect(&receiver.id).await;
    let sender_id = sender.id.clone();
    receiver
        .wait_for("disconnect", limit, |event| {
            matches!(event, NearbyEvent::Disconnected { endpoint_id } if endpoint_id == &sender_id)
        })
        .await?;

    let report = DemoReport {
        payload_id,
        bytes_sent: sent.bytes_transferred,
        bytes_received,
        status: received.status,
        elapsed_ms: started.elapsed().as_millis(),
    };

    sender.stop().await;
    receiver.stop().await;
    info!(
        "Demo finished: {} bytes in {} ms",
        report.bytes_sent, report.elapsed_ms
    );
    Ok(report)
}

async fn send<S: PayloadSource>(
    sender: &Node,
    to: &EndpointId,
    source: &S,
    name: &str,
) -> Result<PayloadId> {
    let payload_id = sender.nearby.send_payload(to, source, name).await?;
    info!("Sending {} as {}", name, payload_id);
    Ok(payload_id)
}
