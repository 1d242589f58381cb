//! Per-object publish/subscribe primitive.
//!
//! Every component that emits notifications owns a [`Dispatcher`]. Listeners
//! are keyed by event type name and fire in registration order. Delivery is
//! synchronous and re-entrant: a handler may dispatch, listen or unlisten on
//! the same dispatcher while it runs. The handler list is snapshotted at the
//! start of each dispatch, so registrations made during a dispatch take effect
//! from the next one.
//!
//! There is no error isolation between handlers. The first handler returning
//! `Err` stops delivery of that dispatch and the error is handed back to the
//! caller of [`Dispatcher::dispatch`]. Recursion depth is not guarded; cycle
//! avoidance is up to the caller.

use crate::cue::Payload;
use crate::Result;
use log::trace;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Identifies one listener registration, for [`Dispatcher::unlisten`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An event as seen by a handler
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event type name
    pub kind: String,
    /// Name of the dispatcher that emitted the event
    pub source: String,
    /// Event payload; empty when the emitter supplied none
    pub data: Payload,
}

impl Event {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }
}

/// Type-erased handler: receives the event and the data bound at registration
type Handler = Arc<dyn Fn(&Event, Option<&Value>) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    handler: Handler,
    data: Option<Arc<Value>>,
}

/// Listener registry and synchronous dispatcher.
///
/// Cloning yields another handle onto the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    source: Arc<str>,
    listeners: Arc<RwLock<HashMap<String, Vec<Registration>>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("source", &self.source)
            .field("event_types", &self.listeners.read().map(|l| l.len()).unwrap_or(0))
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher whose events report `source` as their origin
    pub fn new(source: &str) -> Self {
        Self {
            source: Arc::from(source),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Registers `handler` for `event_type`.
    ///
    /// Registrations for the same type are appended, never replaced.
    pub fn listen<F>(&self, event_type: &str, handler: F) -> ListenerId
    where
        F: Fn(&Event, Option<&Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(handler), None)
    }

    /// Registers `handler` with extra `data` passed back on every delivery
    pub fn listen_with<F>(&self, event_type: &str, data: Value, handler: F) -> ListenerId
    where
        F: Fn(&Event, Option<&Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(handler), Some(Arc::new(data)))
    }

    fn register(&self, event_type: &str, handler: Handler, data: Option<Arc<Value>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type.to_string())
            .or_default()
            .push(Registration { id, handler, data });
        id
    }

    /// Removes a single registration. Returns false if it was already gone.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        for registrations in listeners.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drops every registration
    pub fn clear(&self) {
        self.listeners.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of handlers registered for `event_type`
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Synchronously delivers `event_type` to every registered handler.
    ///
    /// A missing payload is replaced by an empty map. Dispatching a type with
    /// no listeners is a no-op.
    pub fn dispatch(&self, event_type: &str, data: Option<Payload>) -> Result<()> {
        let snapshot: Vec<Registration> = match self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
        {
            Some(registrations) if !registrations.is_empty() => registrations.clone(),
            _ => {
                trace!("{}: no listeners for '{}'", self.source, event_type);
                return Ok(());
            }
        };

        let event = Event {
            kind: event_type.to_string(),
            source: self.source.to_string(),
            data: data.unwrap_or_default(),
        };

        for registration in &snapshot {
            (registration.handler)(&event, registration.data.as_deref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;
    use std::sync::atomic::AtomicI32;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_populates_type_and_source() {
        let dispatcher = Dispatcher::new("player");
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        dispatcher.listen("seek", move |event, _| {
            *s.lock().unwrap() = Some(event.clone());
            Ok(())
        });

        let mut payload = Payload::new();
        payload.insert("position".into(), json!(12.5));
        dispatcher.dispatch("seek", Some(payload)).unwrap();

        let event = seen.lock().unwrap().clone().unwrap();
        assert_eq!(event.kind, "seek");
        assert_eq!(event.source, "player");
        assert_eq!(event.get_f64("position"), Some(12.5));
    }

    #[test]
    fn test_missing_payload_is_empty() {
        let dispatcher = Dispatcher::new("player");
        let empty = Arc::new(AtomicI32::new(0));
        let e = Arc::clone(&empty);
        dispatcher.listen("load", move |event, data| {
            if event.data.is_empty() && data.is_none() {
                e.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        dispatcher.dispatch("load", None).unwrap();
        assert_eq!(empty.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_listeners_is_noop() {
        let dispatcher = Dispatcher::new("player");
        assert!(dispatcher.dispatch("nobody", None).is_ok());
    }

    #[test]
    fn test_listen_with_data() {
        let dispatcher = Dispatcher::new("player");
        let got = Arc::new(Mutex::new(None));
        let g = Arc::clone(&got);
        dispatcher.listen_with("time", json!({"tag": "a"}), move |_, data| {
            *g.lock().unwrap() = data.cloned();
            Ok(())
        });
        dispatcher.dispatch("time", None).unwrap();
        assert_eq!(*got.lock().unwrap(), Some(json!({"tag": "a"})));
    }

    #[test]
    fn test_registration_order_including_recursive_dispatch() {
        let dispatcher = Dispatcher::new("player");
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        dispatcher.listen("tick", move |_, _| {
            l1.lock().unwrap().push("h1");
            Ok(())
        });

        let l2 = Arc::clone(&log);
        let inner = dispatcher.clone();
        dispatcher.listen("tick", move |event, _| {
            l2.lock().unwrap().push("h2");
            // Recurse once, marked through the payload
            if event.get("nested").is_none() {
                let mut payload = Payload::new();
                payload.insert("nested".into(), json!(true));
                inner.dispatch("tick", Some(payload))?;
            }
            Ok(())
        });

        let l3 = Arc::clone(&log);
        dispatcher.listen("tick", move |_, _| {
            l3.lock().unwrap().push("h3");
            Ok(())
        });

        dispatcher.dispatch("tick", None).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["h1", "h2", "h1", "h2", "h3", "h3"]
        );

        log.lock().unwrap().clear();
        dispatcher.dispatch("tick", None).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["h1", "h2", "h1", "h2", "h3", "h3"]
        );
    }

    #[test]
    fn test_error_stops_delivery() {
        let dispatcher = Dispatcher::new("player");
        let counter = Arc::new(AtomicI32::new(0));

        dispatcher.listen("load", |_, _| Err(Error::Handler("boom".into())));
        let c = Arc::clone(&counter);
        dispatcher.listen("load", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = dispatcher.dispatch("load", None).unwrap_err();
        assert!(matches!(err, Error::Handler(ref m) if m == "boom"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unlisten() {
        let dispatcher = Dispatcher::new("player");
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        let id = dispatcher.listen("seek", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch("seek", None).unwrap();
        assert!(dispatcher.unlisten(id));
        assert!(!dispatcher.unlisten(id));
        dispatcher.dispatch("seek", None).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count("seek"), 0);
    }

    #[test]
    fn test_listen_during_dispatch_applies_next_time() {
        let dispatcher = Dispatcher::new("player");
        let counter = Arc::new(AtomicI32::new(0));
        let inner = dispatcher.clone();
        let c = Arc::clone(&counter);
        dispatcher.listen("load", move |_, _| {
            let c = Arc::clone(&c);
            inner.listen("load", move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        dispatcher.dispatch("load", None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count("load"), 2);

        dispatcher.dispatch("load", None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
