//! Notification contract between receivers and their consumer.

use std::sync::Arc;

use crate::message::LogMessage;

/// Consumer-side target of receiver deliveries.
///
/// Implementations must accept calls from any task or thread. A receiver
/// delivers either one message or one ordered batch per call.
pub trait LogMessageSink: Send + Sync {
    fn notify(&self, message: LogMessage);

    /// Delivers `messages` in order.
    ///
    /// The default forwards one by one. Sinks that need the batch to land
    /// atomically override it.
    fn notify_batch(&self, messages: Vec<LogMessage>) {
        for message in messages {
            self.notify(message);
        }
    }
}

impl<T: LogMessageSink + ?Sized> LogMessageSink for Arc<T> {
    fn notify(&self, message: LogMessage) {
        (**self).notify(message);
    }

    fn notify_batch(&self, messages: Vec<LogMessage>) {
        (**self).notify_batch(messages);
    }
}
