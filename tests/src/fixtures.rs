use rundev::{
    mux::{OutputEvent, OUTPUT_QUEUE_CAPACITY},
    protocol::SpawnRequest,
    registry::SessionRegistry,
    supervisor::DevContext,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Ceiling on how long a single event may take to arrive before the test
/// is considered stuck.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a console context without a cgroup (joining the real cgroup needs
/// root) plus the consumer side of its output channel.
pub fn test_context() -> (Arc<DevContext>, mpsc::Receiver<OutputEvent>) {
    let (events, rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
    let ctx = Arc::new(DevContext {
        cgroup: None,
        registry: SessionRegistry::new(),
        events,
    });
    (ctx, rx)
}

/// Build a spawn request for a plain (un-namespaced) name.
pub fn request(name: &str, command: &[&str], oneshot: bool) -> SpawnRequest {
    SpawnRequest {
        name: name.to_string(),
        subname: None,
        command: command.iter().map(|arg| arg.to_string()).collect(),
        env: HashMap::new(),
        chdir: None,
        oneshot,
    }
}

/// Receive the next output event as (name, payload text), panicking if none
/// arrives within [`EVENT_TIMEOUT`].
pub async fn next_event(rx: &mut mpsc::Receiver<OutputEvent>) -> (String, String) {
    let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an output event")
        .expect("output channel closed");
    let text = String::from_utf8_lossy(&event.payload).into_owned();
    (event.name, text)
}

/// Drain events until one satisfies `is_last` (inclusive).
pub async fn events_until(
    rx: &mut mpsc::Receiver<OutputEvent>,
    is_last: impl Fn(&str) -> bool,
) -> Vec<(String, String)> {
    let mut events = Vec::new();
    loop {
        let (name, text) = next_event(rx).await;
        let done = is_last(&text);
        events.push((name, text));
        if done {
            return events;
        }
    }
}
