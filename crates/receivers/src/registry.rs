//! Receiver registry.
//!
//! A static table mapping a type name to a label and a constructor taking the
//! receiver's JSON settings. Registration order is preserved and is the order
//! [`ReceiverRegistry::list`] reports.
//!
//! # Example
//! ```ignore
//! let registry = ReceiverRegistry::with_defaults();
//! let mut rx = registry.create("udp", &serde_json::json!({ "port": 7071 }))?;
//! rx.attach(funnel.clone());
//! rx.initialize().await?;
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{ReceiverConfig, from_settings};
use crate::error::ReceiverError;
use crate::receiver::event_log::{EventLogConfig, EventLogReceiver, EventLogSource, system_event_log};
use crate::receiver::file::{FileConfig, FileReceiver};
use crate::receiver::http::{HttpConfig, HttpReceiver};
use crate::receiver::msmq::{MsmqConfig, MsmqReceiver};
use crate::receiver::policy::{PolicyConfig, PolicyServerReceiver};
use crate::receiver::remoting::{RemotingConfig, RemotingReceiver};
use crate::receiver::tcp::{TcpConfig, TcpReceiver};
use crate::receiver::udp::{UdpConfig, UdpReceiver};
use crate::receiver::websocket::{WebSocketConfig, WebSocketReceiver};
use crate::receiver::{DynReceiver, Receiver, ReceiverKind};

/// Builds a configured receiver from its settings blob.
pub type ReceiverCtor =
    Arc<dyn Fn(&Value) -> Result<Box<dyn DynReceiver>, ReceiverError> + Send + Sync>;

struct Entry {
    name: String,
    label: String,
    ctor: ReceiverCtor,
}

pub struct ReceiverRegistry {
    entries: Vec<Entry>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry with every built-in receiver.
    ///
    /// The event log receiver uses [`system_event_log`] unless
    /// [`Self::with_event_log`] supplies another source.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ReceiverKind::ALL {
            registry.entries.push(Entry {
                name: kind.type_name().to_owned(),
                label: kind.label().to_owned(),
                ctor: builtin_ctor(kind),
            });
        }
        registry.with_event_log(system_event_log())
    }

    /// Backs `event_log` receivers with `source`.
    pub fn with_event_log(mut self, source: Arc<dyn EventLogSource>) -> Self {
        let ctor: ReceiverCtor = Arc::new(move |settings: &Value| {
            build::<EventLogConfig, _>(ReceiverKind::EventLog, settings, |config| {
                EventLogReceiver::with_source(config, Arc::clone(&source))
            })
        });
        let name = ReceiverKind::EventLog.type_name();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.ctor = ctor,
            None => self.entries.push(Entry {
                name: name.to_owned(),
                label: ReceiverKind::EventLog.label().to_owned(),
                ctor,
            }),
        }
        self
    }

    /// Adds a receiver type.
    ///
    /// Fails if `name` is already registered.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        label: impl Into<String>,
        ctor: F,
    ) -> Result<(), ReceiverError>
    where
        F: Fn(&Value) -> Result<Box<dyn DynReceiver>, ReceiverError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(&name) {
            return Err(ReceiverError::config(
                "receivers.type",
                format!("receiver type '{name}' is already registered"),
            ));
        }
        self.entries.push(Entry {
            name,
            label: label.into(),
            ctor: Arc::new(ctor),
        });
        Ok(())
    }

    /// Builds a fresh receiver of type `name` from `settings`.
    pub fn create(&self, name: &str, settings: &Value) -> Result<Box<dyn DynReceiver>, ReceiverError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ReceiverError::Unsupported(format!("unknown receiver type '{name}'")))?;
        (entry.ctor)(settings)
    }

    pub fn create_default(&self, name: &str) -> Result<Box<dyn DynReceiver>, ReceiverError> {
        self.create(name, &Value::Null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// `(type_name, label)` pairs in registration order.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.label.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReceiverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ReceiverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

type CtorFn = fn(&Value) -> Result<Box<dyn DynReceiver>, ReceiverError>;

fn builtin_ctor(kind: ReceiverKind) -> ReceiverCtor {
    let ctor: CtorFn = match kind {
        ReceiverKind::Tcp => |s| build::<TcpConfig, _>(ReceiverKind::Tcp, s, TcpReceiver::new),
        ReceiverKind::Udp => |s| build::<UdpConfig, _>(ReceiverKind::Udp, s, UdpReceiver::new),
        ReceiverKind::Http => |s| build::<HttpConfig, _>(ReceiverKind::Http, s, HttpReceiver::new),
        ReceiverKind::WebSocket => {
            |s| build::<WebSocketConfig, _>(ReceiverKind::WebSocket, s, WebSocketReceiver::new)
        }
        ReceiverKind::Msmq => |s| build::<MsmqConfig, _>(ReceiverKind::Msmq, s, MsmqReceiver::new),
        ReceiverKind::File => |s| build::<FileConfig, _>(ReceiverKind::File, s, FileReceiver::new),
        ReceiverKind::EventLog => {
            |s| build::<EventLogConfig, _>(ReceiverKind::EventLog, s, EventLogReceiver::new)
        }
        ReceiverKind::Remoting => {
            |s| build::<RemotingConfig, _>(ReceiverKind::Remoting, s, RemotingReceiver::new)
        }
        ReceiverKind::PolicyServer => {
            |s| build::<PolicyConfig, _>(ReceiverKind::PolicyServer, s, PolicyServerReceiver::new)
        }
    };
    Arc::new(ctor)
}

/// Decodes `C` from `settings` and wraps the receiver `make` builds from it.
pub fn build<C, R>(
    kind: ReceiverKind,
    settings: &Value,
    make: impl FnOnce(C) -> R,
) -> Result<Box<dyn DynReceiver>, ReceiverError>
where
    C: ReceiverConfig,
    R: Receiver + 'static,
{
    let config: C = from_settings(kind, settings)?;
    Ok(Box::new(make(config)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::receiver::ReceiverState;
    use crate::receiver::event_log::{EntryType, EventLogEntry, InMemoryEventLog, UnavailableEventLog};

    #[test]
    fn defaults_cover_every_kind() {
        let registry = ReceiverRegistry::with_defaults();
        let names: Vec<&str> = registry.list().into_iter().map(|(n, _)| n).collect();
        let expected: Vec<&str> = ReceiverKind::ALL.iter().map(|k| k.type_name()).collect();
        assert_eq!(names, expected);
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn create_default_builds_idle_receivers() {
        let registry = ReceiverRegistry::with_defaults();
        for kind in ReceiverKind::ALL {
            let rx = registry.create_default(kind.type_name()).unwrap();
            assert_eq!(rx.kind(), kind);
            assert_eq!(rx.state(), ReceiverState::Idle);
            assert_eq!(rx.display_name(), kind.label());
            assert!(!rx.sample_client_config().is_empty());
        }
    }

    #[test]
    fn settings_are_applied() {
        let registry = ReceiverRegistry::with_defaults();
        let rx = registry
            .create("udp", &json!({ "port": 9999, "name": "edge" }))
            .unwrap();
        assert_eq!(rx.display_name(), "UDP (IP v4 and v6) [edge]");
        assert!(rx.sample_client_config().contains("9999"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = ReceiverRegistry::with_defaults();
        let err = registry.create_default("carrier_pigeon").err().unwrap();
        assert!(matches!(err, ReceiverError::Unsupported(_)));
    }

    #[test]
    fn invalid_settings_name_the_field() {
        let registry = ReceiverRegistry::with_defaults();
        let cases = [
            ("policy_server", json!({ "port_from": 9000, "port_to": 10 })),
            ("udp", json!({ "multicast_group": "10.0.0.1" })),
            ("msmq", json!({ "queue_name": "" })),
            ("websocket", json!({ "server_uri": "http://nope" })),
            ("tcp", json!({ "port": "not a number" })),
        ];
        for (name, settings) in cases {
            let err = registry.create(name, &settings).err().unwrap();
            assert!(
                matches!(err, ReceiverError::Config { .. }),
                "{name} {settings} gave {err}"
            );
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ReceiverRegistry::with_defaults();
        let err = registry.register("tcp", "again", |s| {
            build::<TcpConfig, _>(ReceiverKind::Tcp, s, TcpReceiver::new)
        });
        assert!(err.is_err());

        registry
            .register("tcp_alt", "Second TCP", |s| {
                build::<TcpConfig, _>(ReceiverKind::Tcp, s, TcpReceiver::new)
            })
            .unwrap();
        assert_eq!(registry.list().last(), Some(&("tcp_alt", "Second TCP")));
    }

    #[tokio::test]
    async fn injected_event_log_source_is_used() {
        let hub = InMemoryEventLog::new();
        let registry = ReceiverRegistry::with_defaults().with_event_log(Arc::new(hub.clone()));
        let mut rx = registry.create_default("event_log").unwrap();
        rx.initialize().await.unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        hub.write(
            "Application",
            EventLogEntry::new("svc", EntryType::Information, "started"),
        );
        rx.terminate().await;

        let mut rx = ReceiverRegistry::with_defaults()
            .with_event_log(Arc::new(UnavailableEventLog))
            .create_default("event_log")
            .unwrap();
        assert!(rx.initialize().await.is_err());
        assert!(matches!(rx.state(), ReceiverState::Failed(_)));
    }
}
