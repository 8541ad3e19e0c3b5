//! Watch a set of events around an action and compare them to expectations.
//!
//! Events arrive asynchronously relative to the test driver, so the watch
//! stays attached for a settle delay after the action finishes before the
//! collected events are compared.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use super::bus::{EventBus, Listener};
use super::event::AmiEvent;

/// Mismatch between watched and expected events.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventMismatch {
    /// Different number of events.
    #[error("expected {expected} events, got {actual}")]
    Length { expected: usize, actual: usize },

    /// An event does not match its expected pattern.
    #[error("event {index}: field '{field}' expected {expected}, got {actual}")]
    Field {
        index: usize,
        field: String,
        expected: Value,
        actual: Value,
    },

    /// An expected pattern is not a JSON object.
    #[error("expected pattern {index} is not an object")]
    InvalidPattern { index: usize },
}

/// Run `action` while collecting events whose type matches any of `names`
/// (case-insensitive), then wait `settle` before detaching.
///
/// Returns the action's output and the matched events in arrival order.
pub async fn watch_events<F, Fut, T>(
    bus: &EventBus,
    names: &[&str],
    settle: Duration,
    action: F,
) -> (T, Vec<AmiEvent>)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut keys: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    keys.sort();
    keys.dedup();

    let events = Arc::new(Mutex::new(Vec::new()));
    let registered: Vec<_> = keys
        .iter()
        .map(|key| {
            let sink = Arc::clone(&events);
            let listener: Listener =
                Arc::new(move |event: &AmiEvent| sink.lock().push(event.clone()));
            (key.as_str(), bus.on(key, listener))
        })
        .collect();

    let output = action().await;
    tokio::time::sleep(settle).await;

    for (key, id) in registered {
        bus.off(key, id);
    }
    let collected = std::mem::take(&mut *events.lock());
    (output, collected)
}

/// Compare `actual` events against `expected` patterns.
///
/// Lengths must be equal. Each pattern is a JSON object whose fields must
/// all be present in the corresponding event with equal values; nested
/// objects match the same way and extra event fields are ignored.
///
/// # Errors
///
/// Returns the first [`EventMismatch`] found.
pub fn check_events(actual: &[AmiEvent], expected: &[Value]) -> Result<(), EventMismatch> {
    if actual.len() != expected.len() {
        return Err(EventMismatch::Length {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    for (index, (event, pattern)) in actual.iter().zip(expected).enumerate() {
        let Value::Object(pattern) = pattern else {
            return Err(EventMismatch::InvalidPattern { index });
        };
        for (field, want) in pattern {
            let got = event.get(field).cloned().unwrap_or(Value::Null);
            if !value_matches(&got, want) {
                return Err(EventMismatch::Field {
                    index,
                    field: field.clone(),
                    expected: want.clone(),
                    actual: got,
                });
            }
        }
    }
    Ok(())
}

fn value_matches(actual: &Value, pattern: &Value) -> bool {
    match (actual, pattern) {
        (Value::Object(actual), Value::Object(pattern)) => pattern.iter().all(|(key, want)| {
            actual
                .get(key)
                .is_some_and(|got| value_matches(got, want))
        }),
        _ => actual == pattern,
    }
}
