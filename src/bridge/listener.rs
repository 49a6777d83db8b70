//! UDP receive loop feeding decoded StatsD events into the bounded queue.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use super::protocol::Event;
use super::stats::BridgeStats;

/// Largest possible UDP payload.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// How often a blocked receive wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reads datagrams from the StatsD socket and feeds decoded events into the bounded queue.
pub struct StatsdListener {
    socket: UdpSocket,
    stats: Arc<BridgeStats>,
}

impl StatsdListener {
    /// # Errors
    /// Fails if the socket read timeout cannot be set.
    pub fn new(socket: UdpSocket, stats: Arc<BridgeStats>) -> std::io::Result<Self> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self { socket, stats })
    }

    /// Decodes one datagram and enqueues every valid event.
    ///
    /// Blocks while the queue is full. Returns `false` once the consumer is gone.
    fn handle_datagram(&self, datagram: &[u8], events: &Sender<Event>) -> bool {
        BridgeStats::incr(&self.stats.udp_packets);
        for result in Event::parse_all(datagram) {
            BridgeStats::incr(&self.stats.lines);
            match result {
                Ok(event) => {
                    if events.send(event).is_err() {
                        return false;
                    }
                }
                Err(err) => {
                    debug!("Skipping malformed StatsD line: {err}");
                    BridgeStats::incr(&self.stats.invalid_lines);
                }
            }
        }
        true
    }

    /// Runs until `shutdown` is closed or the event consumer goes away.
    pub fn run(self, events: &Sender<Event>, shutdown: &Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            if let Err(TryRecvError::Disconnected) = shutdown.try_recv() {
                break;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((size, _)) => {
                    if !self.handle_datagram(&buf[..size], events) {
                        break;
                    }
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => warn!("Error receiving StatsD datagram: {err}"),
            }
        }
        info!("StatsD listener stopped");
    }
}
