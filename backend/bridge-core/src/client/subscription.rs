use super::{ClientInner, decode};
use crate::channel::ChannelId;
use crate::envelope::SubscriptionEvent;
use crate::error::client::ClientError;
use crate::protocol::ClientMessage;

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// Client end of one subscription invocation.
///
/// Yields events until the producer completes, fails, or is stopped.
/// Dropping an unfinished subscription stops it.
pub struct Subscription<O> {
    channel: ChannelId,
    events: UnboundedReceiver<Option<SubscriptionEvent>>,
    client: Arc<ClientInner>,
    finished: bool,
    stop_sent: bool,
    _phantom: PhantomData<fn() -> O>,
}

impl<O: DeserializeOwned> Subscription<O> {
    pub(crate) fn new(
        channel: ChannelId,
        events: UnboundedReceiver<Option<SubscriptionEvent>>,
        client: Arc<ClientInner>,
    ) -> Self {
        Self {
            channel,
            events,
            client,
            finished: false,
            stop_sent: false,
            _phantom: PhantomData,
        }
    }

    /// Next event, or `None` once the terminal sentinel arrived (or the
    /// connection dropped).
    ///
    /// An error event is yielded as `Some(Err(..))`; the stream is not
    /// necessarily over after one.
    pub async fn next(&mut self) -> Option<Result<O, ClientError>> {
        if self.finished {
            return None;
        }

        match self.events.recv().await {
            Some(Some(event)) => Some(self.convert(event)),
            Some(None) | None => {
                self.finished = true;
                self.client.forget_events(&self.channel);
                None
            }
        }
    }

    /// Asks the producer to stop. The stream then ends with the terminal
    /// sentinel; events already in flight may still arrive first.
    pub fn stop(&mut self) -> Result<(), ClientError> {
        if self.finished || self.stop_sent {
            return Ok(());
        }
        self.stop_sent = true;
        self.client.send(ClientMessage::Signal {
            channel: self.channel.stop_signal(),
        })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn convert(&self, event: SubscriptionEvent) -> Result<O, ClientError> {
        if let Some(error) = event.error {
            return Err(error.into_remote().into());
        }
        decode(event.message.unwrap_or(Value::Null))
    }
}

impl<O> Drop for Subscription<O> {
    fn drop(&mut self) {
        if !self.finished && !self.stop_sent {
            let _ = self.client.send(ClientMessage::Signal {
                channel: self.channel.stop_signal(),
            });
        }
        self.client.forget_events(&self.channel);
    }
}
