//! Terminal progress feed for a discovery run
//!
//! Renders discovery events as plain lines on stdout, separate from the
//! tracing log stream.

use rackmap_discovery::DiscoveryEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::debug;

/// One line of progress output for an event.
pub fn progress_line(event: &DiscoveryEvent) -> String {
    match event {
        DiscoveryEvent::BaselineCaptured { pem_ports, serial_ports, endpoints } => format!(
            "baseline: {} pem ports, {} serial ports, {} endpoints",
            pem_ports, serial_ports, endpoints
        ),
        DiscoveryEvent::RoundStarted { channel } => {
            format!("channel {}: switched off", channel)
        }
        DiscoveryEvent::EndpointAttributed { channel, endpoint } => {
            format!("channel {}: {}", channel, endpoint)
        }
        DiscoveryEvent::PortAttributed { channel, kind, port } => {
            format!("channel {}: {} port {}", channel, kind, port)
        }
        DiscoveryEvent::AmbiguousDisappearance { channel, kind, ports } => {
            let names: Vec<&str> = ports.iter().map(|port| port.as_str()).collect();
            format!(
                "channel {}: {} ports {} disappeared together, none attributed",
                channel,
                kind,
                names.join(", ")
            )
        }
        DiscoveryEvent::RunCompleted { records } => {
            format!("discovery complete, {} devices", records)
        }
    }
}

/// Prints one progress line per event until the channel closes.
pub async fn stream_progress(mut events: Receiver<DiscoveryEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", progress_line(&event)),
            Err(RecvError::Lagged(n)) => {
                debug!(skipped = n, "Progress feed lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackmap_core::{CutterLink, NetworkEndpoint, PortId};
    use rackmap_discovery::ProbeKind;

    fn link() -> CutterLink {
        CutterLink::new("usb-relay", Some("2".to_string()))
    }

    #[test]
    fn test_attribution_lines_name_the_channel() {
        let line = progress_line(&DiscoveryEvent::PortAttributed {
            channel: link(),
            kind: ProbeKind::Pem,
            port: PortId::new("/dev/ttyUSB3"),
        });
        assert_eq!(line, "channel usb-relay/2: pem port /dev/ttyUSB3");

        let line = progress_line(&DiscoveryEvent::EndpointAttributed {
            channel: link(),
            endpoint: NetworkEndpoint::Pc {
                mac: "54:ab:3a:0d:8f:10".to_string(),
                ip: "192.168.30.105".to_string(),
            },
        });
        assert_eq!(
            line,
            "channel usb-relay/2: pc 192.168.30.105 (54:ab:3a:0d:8f:10)"
        );
    }

    #[test]
    fn test_ambiguous_line_lists_every_port() {
        let line = progress_line(&DiscoveryEvent::AmbiguousDisappearance {
            channel: link(),
            kind: ProbeKind::Serial,
            ports: vec![PortId::new("/dev/ttyUSB0"), PortId::new("/dev/ttyUSB4")],
        });
        assert_eq!(
            line,
            "channel usb-relay/2: serial ports /dev/ttyUSB0, /dev/ttyUSB4 disappeared together, none attributed"
        );
    }

    #[test]
    fn test_run_summary_lines() {
        let line = progress_line(&DiscoveryEvent::BaselineCaptured {
            pem_ports: 3,
            serial_ports: 2,
            endpoints: 4,
        });
        assert_eq!(line, "baseline: 3 pem ports, 2 serial ports, 4 endpoints");

        let line = progress_line(&DiscoveryEvent::RoundStarted { channel: link() });
        assert_eq!(line, "channel usb-relay/2: switched off");

        let line = progress_line(&DiscoveryEvent::RunCompleted { records: 5 });
        assert_eq!(line, "discovery complete, 5 devices");
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_drops() {
        let (tx, rx) = tokio::sync::broadcast::channel(8);
        let feed = tokio::spawn(stream_progress(rx));

        let _ = tx.send(DiscoveryEvent::RunCompleted { records: 0 });
        drop(tx);

        feed.await.unwrap();
    }
}
