use bytes::Bytes;

use crate::backend::{BatchInput, BATCH_SIZE_PROPERTY, RESET_PROPERTY};
use crate::session::Session;

/// Key of a per-slot entry: `batch_{slot}.{name}`.
pub fn slot_key(slot: usize, name: &str) -> String {
    format!("batch_{slot}.{name}")
}

/// Builds one backend batch from the active sessions.
///
/// Slot `i` is `sessions[i]`. Each slot carries the session's request
/// properties, its payload under `data` and, on its first iteration only, its
/// `seed`. The batch declares `batch_size` and, when `reset` is set, the reset
/// marker.
pub fn assemble_batch(sessions: &[Session], reset: bool) -> BatchInput {
    let mut batch = BatchInput::new();
    if reset {
        batch.add_property(RESET_PROPERTY, "true");
    }

    for (slot, session) in sessions.iter().enumerate() {
        for (key, value) in session.properties() {
            batch.add_property(slot_key(slot, key), value.clone());
        }

        batch.add(slot_key(slot, "data"), session.payload());
        if let Some(seed) = session.seed() {
            batch.add(slot_key(slot, "seed"), Bytes::from(seed.to_string()));
        }
    }

    batch.add_property(BATCH_SIZE_PROPERTY, sessions.len().to_string());
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Request, CONTINUATION_PLACEHOLDER};

    fn session(name: &str, body: &'static str, seed: &str) -> Session {
        let request = Request::new(body)
            .with_property("name", name)
            .with_property("Content-Type", "application/json");
        Session::new(request, seed.to_string(), None).0
    }

    #[test]
    fn test_first_iteration_batch() {
        let sessions = vec![session("A", "{\"inputs\":\"a\"}", "11"), session("B", "{\"inputs\":\"b\"}", "22")];

        let batch = assemble_batch(&sessions, false);

        assert_eq!(batch.batch_size(), Some(2));
        assert!(!batch.is_reset());
        assert_eq!(batch.property("batch_0.name"), Some("A"));
        assert_eq!(batch.property("batch_1.name"), Some("B"));
        assert_eq!(batch.property("batch_0.Content-Type"), Some("application/json"));
        assert_eq!(batch.get("batch_0.data"), Some(&Bytes::from_static(b"{\"inputs\":\"a\"}")));
        assert_eq!(batch.get("batch_1.data"), Some(&Bytes::from_static(b"{\"inputs\":\"b\"}")));
        assert_eq!(batch.get("batch_0.seed"), Some(&Bytes::from_static(b"11")));
        assert_eq!(batch.get("batch_1.seed"), Some(&Bytes::from_static(b"22")));

        let keys: Vec<&str> = batch.content().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["batch_0.data", "batch_0.seed", "batch_1.data", "batch_1.seed"]);
    }

    #[test]
    fn test_continuing_session_sends_placeholder_without_seed() {
        let mut sessions = vec![session("A", "{\"inputs\":\"a\"}", "11"), session("C", "{\"inputs\":\"c\"}", "33")];
        sessions[0].record_fragment("foo".to_string(), false);

        let batch = assemble_batch(&sessions, false);

        assert_eq!(batch.get("batch_0.data"), Some(&Bytes::from_static(CONTINUATION_PLACEHOLDER)));
        assert_eq!(batch.get("batch_0.seed"), None);
        // Properties travel with every iteration
        assert_eq!(batch.property("batch_0.name"), Some("A"));

        assert_eq!(batch.get("batch_1.data"), Some(&Bytes::from_static(b"{\"inputs\":\"c\"}")));
        assert_eq!(batch.get("batch_1.seed"), Some(&Bytes::from_static(b"33")));
    }

    #[test]
    fn test_reset_marker() {
        let sessions = vec![session("A", "x", "1")];

        let batch = assemble_batch(&sessions, true);
        assert_eq!(batch.property("reset_rollingbatch"), Some("true"));
        assert!(batch.is_reset());

        let batch = assemble_batch(&sessions, false);
        assert_eq!(batch.property("reset_rollingbatch"), None);
    }
}
