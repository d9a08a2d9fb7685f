use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, watch};

use crate::core::{Error, Result};
use crate::protocol::{Command, Message};
use super::{MessageTransport, Subscriber};

/// Events forwarded by a `MessageProtocol`
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionMade,
    Message(Message),
    PauseWriting,
    ResumeWriting,
    /// The transport is gone; carries the cause, if there was one
    ConnectionLost(Option<String>),
}

/// A subscriber that forwards transport events to a channel and holds
/// producers back while the transport is paused
#[derive(Debug)]
pub struct MessageProtocol {
    events: mpsc::UnboundedSender<TransportEvent>,
    transport: OnceCell<Weak<MessageTransport>>,
    paused: watch::Sender<bool>,
}

impl MessageProtocol {
    /// Creates a protocol and the receiving end of its event channel
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (paused, _) = watch::channel(false);
        let protocol = MessageProtocol {
            events,
            transport: OnceCell::new(),
            paused,
        };
        (Arc::new(protocol), rx)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Sends a command once the transport is not paused
    pub async fn send_data(&self, cmd: Command) -> Result<()> {
        let mut paused = self.paused.subscribe();
        paused
            .wait_for(|paused| !*paused)
            .await
            .map_err(|_| Error::transport_closed("protocol dropped"))?;

        self.transport()?.write(cmd).await
    }

    /// Sends a request once the transport is not paused and awaits its response
    pub async fn request(&self, cmd: Command) -> Result<Message> {
        let mut paused = self.paused.subscribe();
        paused
            .wait_for(|paused| !*paused)
            .await
            .map_err(|_| Error::transport_closed("protocol dropped"))?;

        self.transport()?.request(cmd).await
    }

    fn transport(&self) -> Result<Arc<MessageTransport>> {
        self.transport
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::transport_closed("protocol is not attached to a transport"))
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event receiver dropped");
        }
    }
}

impl Subscriber for MessageProtocol {
    fn connection_made(&self, transport: &Arc<MessageTransport>) {
        if self.transport.set(Arc::downgrade(transport)).is_err() {
            tracing::warn!("Protocol is already attached to a transport");
        }
        self.emit(TransportEvent::ConnectionMade);
    }

    fn data_received(&self, msg: &Message) {
        self.emit(TransportEvent::Message(msg.clone()));
    }

    fn pause_writing(&self) {
        self.paused.send_replace(true);
        self.emit(TransportEvent::PauseWriting);
    }

    fn resume_writing(&self) {
        self.paused.send_replace(false);
        self.emit(TransportEvent::ResumeWriting);
    }

    fn connection_lost(&self, error: Option<&Error>) {
        self.emit(TransportEvent::ConnectionLost(error.map(Error::to_string)));
    }
}
