//! Transport abstraction between the relay and peer connections
//!
//! The relay only ever pushes text and close requests at a peer. Inbound
//! traffic is delivered by whoever owns the connection, through
//! [`Relay::on_message`](crate::Relay::on_message),
//! [`Relay::on_close`](crate::Relay::on_close) and
//! [`Relay::on_error`](crate::Relay::on_error).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use switchboard_core::{CloseCode, TransportError};

/// Outbound half of a peer connection
pub trait Transport: Send + Sync {
    /// Queue a text message. Never blocks.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection with a code and reason
    fn close(&self, code: CloseCode, reason: &str);

    /// Whether sends are currently accepted
    fn is_open(&self) -> bool;
}

/// Commands for the task that owns the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: CloseCode, reason: String },
}

/// Transport backed by an unbounded channel drained by the connection task
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
}

impl ChannelTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            open: AtomicBool::new(true),
        };
        (transport, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.tx
            .send(Outbound::Text(text.to_owned()))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: CloseCode, reason: &str) {
        // Only the first close reaches the socket
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            });
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}
