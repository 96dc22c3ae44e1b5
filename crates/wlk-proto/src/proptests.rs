use proptest::prelude::*;

use crate::message::{Message, MessageResponse, MessageType};
use crate::payload::{Payload, SignMessagePayload, SignTransactionPayload, TrustSitePayload};
use crate::relay::{AckRequest, SessionData};

prop_compose! {
    fn any_trust_site()(
        app in ".{0,24}",
        domain in "https://[a-z]{1,12}\\.example",
        icon in proptest::option::of(".{0,32}"),
        accept in proptest::option::of(any::<bool>()),
        pubkey in proptest::option::of(proptest::collection::vec(any::<u8>(), 32)),
    ) -> TrustSitePayload {
        TrustSitePayload { app, domain, icon, accept, pubkey }
    }
}

prop_compose! {
    fn any_sign_message()(
        message in proptest::collection::vec(any::<u8>(), 0..256),
        signature in proptest::option::of(proptest::collection::vec(any::<u8>(), 64)),
    ) -> SignMessagePayload {
        SignMessagePayload { message, signature }
    }
}

prop_compose! {
    fn any_sign_transaction()(
        transaction in proptest::collection::vec(any::<u8>(), 0..512),
        versioned in any::<bool>(),
        signatures in proptest::option::of(
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 64), 0..4)
        ),
    ) -> SignTransactionPayload {
        SignTransactionPayload { transaction, versioned, signatures }
    }
}

fn any_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        any_trust_site().prop_map(Payload::TrustSite),
        any_sign_message().prop_map(Payload::SignMessage),
        any_sign_transaction().prop_map(Payload::SignTransaction),
    ]
}

prop_compose! {
    fn any_message()(
        id in "[0-9a-f-]{36}",
        origin in "https://[a-z]{1,12}\\.example(:[0-9]{2,5})?",
        payload in any_payload(),
    ) -> Message {
        Message::new(id, origin, payload)
    }
}

proptest! {
    #[test]
    fn payload_round_trip(p in any_payload()) {
        let decoded = Payload::decode(&p.encode(), p.message_type()).unwrap();
        prop_assert_eq!(decoded, p);
    }

    #[test]
    fn envelope_round_trip(m in any_message()) {
        let decoded = Message::deserialize(&m.serialize()).unwrap();
        prop_assert_eq!(decoded, m);
    }

    #[test]
    fn response_round_trip(
        id in "[0-9a-f]{8}",
        payload in any_payload(),
        error in proptest::option::of(".{1,40}"),
    ) {
        let resp = match error {
            Some(e) => MessageResponse::failure(id, payload.message_type(), e),
            None => MessageResponse::success(id, payload),
        };
        let decoded = MessageResponse::deserialize(&resp.serialize()).unwrap();
        prop_assert_eq!(decoded, resp);
    }

    #[test]
    fn relay_bodies_round_trip(m in any_message()) {
        prop_assert_eq!(SessionData::from_message(&m).to_message().unwrap(), m.clone());
        let resp = MessageResponse::failure(m.id.clone(), MessageType::SignMessage, "declined");
        prop_assert_eq!(AckRequest::from_response(&resp).to_response().unwrap(), resp);
    }

    #[test]
    fn garbage_never_panics(text in ".{0,128}") {
        let _ = Message::deserialize(&text);
        let _ = MessageResponse::deserialize(&text);
        for t in [MessageType::TrustSite, MessageType::SignMessage, MessageType::SignTransaction] {
            let _ = Payload::decode(&text, t);
        }
    }
}
