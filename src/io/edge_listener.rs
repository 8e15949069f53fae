//! TCP edge input for the axle sensors
//!
//! Listens on `sensors.listen_addr` (default 0.0.0.0:7600).
//! Protocol: one line per active edge, `S1` or `S2` (`1`/`2` accepted).
//! Edges are stamped with the uptime clock as soon as the line is read.

use crate::domain::types::{SensorEdge, SensorId, Uptime};
use crate::services::edge_detector::EdgeDetector;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// The sensor input could not be brought up
#[derive(Debug, Error)]
pub enum SensorInitError {
    #[error("failed to bind sensor input on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct EdgeListener {
    listener: TcpListener,
}

impl EdgeListener {
    pub async fn bind(addr: &str) -> Result<Self, SensorInitError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SensorInitError::Bind { addr: addr.to_string(), source })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept sensor connections until shutdown
    pub async fn run(
        self,
        detector: Arc<EdgeDetector>,
        uptime: Uptime,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(addr = ?self.local_addr(), "edge_listener_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("edge_listener_shutdown");
                        return;
                    }
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let d = detector.clone();
                            let rx = shutdown.clone();
                            tokio::spawn(async move {
                                handle_sensor_connection(socket, addr, d, uptime, rx).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "edge_listener_accept_failed");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_sensor_connection(
    socket: TcpStream,
    addr: SocketAddr,
    detector: Arc<EdgeDetector>,
    uptime: Uptime,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = addr.to_string();
    info!(peer = %peer, "sensor_connected");

    let mut lines = BufReader::new(socket).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "sensor_read_failed");
                    break;
                }
            },
        };
        let at_ms = uptime.now_ms();

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<SensorId>() {
            Ok(sensor) => {
                detector.on_edge(SensorEdge::new(sensor, at_ms));
            }
            Err(e) => {
                debug!(peer = %peer, line = %line, error = %e, "sensor_unknown_message");
            }
        }
    }

    info!(peer = %peer, "sensor_disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::RearmPolicy;
    use crate::infra::metrics::Metrics;
    use crate::services::passage_queue::passage_queue;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_bind_failure_is_sensor_init_error() {
        let taken = EdgeListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = EdgeListener::bind(&addr).await.err().unwrap();
        assert!(matches!(err, SensorInitError::Bind { .. }));
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn test_lines_drive_detector() {
        let metrics = Arc::new(Metrics::new());
        let (producer, mut consumer) = passage_queue(4, metrics.clone());
        let (detector, _) = EdgeDetector::new(100, RearmPolicy::Immediate, producer, metrics);
        let detector = Arc::new(detector);

        let listener = EdgeListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(listener.run(detector, Uptime::start(), shutdown_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"S1\nnoise\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(b"2\n").await.unwrap();

        let record = tokio::time::timeout(Duration::from_secs(1), consumer.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.seq, 1);
        assert_eq!(record.axle_count, 2);
        assert!(record.elapsed_ms >= 10);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    }
}
