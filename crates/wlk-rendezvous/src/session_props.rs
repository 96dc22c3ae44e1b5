use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::SigningKey;
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

use crate::session::{SessionStore, SessionStoreError};

const MAX_PAYLOAD: usize = 512;

fn store() -> SessionStore {
    SessionStore::new(SigningKey::from_bytes(&[3u8; 32]), MAX_PAYLOAD, Duration::from_secs(120))
}

proptest! {
    // Stored data comes back unchanged, exactly once
    #[test]
    fn test_fetch_returns_data_once(payload in prop::collection::vec(any::<u8>(), 0..MAX_PAYLOAD)) {
        let store = store();
        let data = B64.encode(&payload);
        let id = store.create(&data).unwrap();

        prop_assert_eq!(store.fetch(&id), Ok(data));
        prop_assert_eq!(store.fetch(&id), Err(SessionStoreError::Consumed));
    }

    // Distinct payloads never share a session id
    #[test]
    fn test_distinct_payloads_get_distinct_ids(
        payloads in prop::collection::hash_set(prop::collection::vec(any::<u8>(), 0..64), 1..20)
    ) {
        let store = store();
        let mut ids = HashSet::new();
        for payload in &payloads {
            let id = store.create(&B64.encode(payload)).unwrap();
            prop_assert!(ids.insert(id));
        }
        prop_assert_eq!(store.len(), payloads.len());
    }

    // Size limit applies to decoded bytes
    #[test]
    fn test_payload_limit_enforcement(extra in 1..64usize) {
        let store = store();
        let data = B64.encode(vec![0u8; MAX_PAYLOAD + extra]);
        prop_assert_eq!(store.create(&data), Err(SessionStoreError::TooLarge));
        prop_assert!(store.is_empty());
    }

    // Only the first ack is stored
    #[test]
    fn test_first_ack_wins(
        acks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..5)
    ) {
        let store = store();
        let id = store.create(&B64.encode(b"request")).unwrap();
        for (i, ack) in acks.iter().enumerate() {
            let result = store.ack(&id, &B64.encode(ack));
            if i == 0 {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result, Err(SessionStoreError::AlreadyAcked));
            }
        }
        prop_assert_eq!(store.take_response(&id), Ok(Some(B64.encode(&acks[0]))));
    }
}
