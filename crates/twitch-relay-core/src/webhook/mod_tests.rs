//! Tests for EventSub header extraction, classification and processing.

use super::*;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::dispatcher::BroadcastReport;

// ============================================================================
// Helpers
// ============================================================================

const SECRET: &str = "0123456789abcdef-secret";
const MESSAGE_ID: &str = "befa7b53-d79d-478f-86b9-120f112b044e";
const TIMESTAMP: &str = "2019-11-16T10:11:12.634234626Z";

const FOLLOW_BODY: &str = r#"{"subscription":{"id":"f1c2a387-161a-49f9-a165-0f21d7a4e1c4","type":"channel.follow","version":"2"},"event":{"user_id":"1234","user_name":"cool_user","broadcaster_user_name":"streamer"}}"#;

fn signed_request(message_type: Option<&str>, body: &str) -> WebhookRequest {
    let headers = WebhookHeaders {
        message_id: Some(MESSAGE_ID.to_string()),
        timestamp: Some(TIMESTAMP.to_string()),
        signature: Some(signature::compute_signature(
            SECRET,
            MESSAGE_ID,
            TIMESTAMP,
            body.as_bytes(),
        )),
        message_type: message_type.map(str::to_string),
    };
    WebhookRequest::new(headers, Bytes::from(body.to_string()))
}

fn processor_with_registry() -> (EventSubProcessor, Arc<ConnectionRegistry>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(FanoutDispatcher::new(
        Arc::clone(&registry),
        ["channel.follow"],
    ));
    (
        EventSubProcessor::new(SharedSecret::new(SECRET), dispatcher),
        registry,
    )
}

// ============================================================================
// WebhookHeaders tests
// ============================================================================

mod header_tests {
    use super::*;

    #[test]
    fn test_headers_are_matched_case_insensitively() {
        let mut raw = HashMap::new();
        raw.insert("Twitch-Eventsub-Message-Id".to_string(), "id".to_string());
        raw.insert(
            "TWITCH-EVENTSUB-MESSAGE-TIMESTAMP".to_string(),
            "ts".to_string(),
        );
        raw.insert(
            "twitch-eventsub-message-signature".to_string(),
            "sha256=00".to_string(),
        );
        raw.insert(
            "Twitch-Eventsub-Message-Type".to_string(),
            "notification".to_string(),
        );

        let headers = WebhookHeaders::from_http_headers(&raw);

        assert_eq!(headers.message_id.as_deref(), Some("id"));
        assert_eq!(headers.timestamp.as_deref(), Some("ts"));
        assert_eq!(headers.signature.as_deref(), Some("sha256=00"));
        assert_eq!(headers.message_type.as_deref(), Some("notification"));
    }

    #[test]
    fn test_missing_signature_is_reported_first() {
        let headers = WebhookHeaders::default();

        let err = headers.signature_context().unwrap_err();

        assert_eq!(
            err,
            ValidationError::Required {
                field: HEADER_MESSAGE_SIGNATURE.to_string()
            }
        );
    }

    #[test]
    fn test_missing_timestamp_is_reported() {
        let headers = WebhookHeaders {
            message_id: Some("id".to_string()),
            signature: Some("sha256=00".to_string()),
            ..Default::default()
        };

        let err = headers.signature_context().unwrap_err();

        assert_eq!(
            err,
            ValidationError::Required {
                field: HEADER_MESSAGE_TIMESTAMP.to_string()
            }
        );
    }
}

// ============================================================================
// MessageType tests
// ============================================================================

mod message_type_tests {
    use super::*;

    #[test]
    fn test_known_types_parse() {
        assert_eq!(
            "webhook_callback_verification".parse::<MessageType>().unwrap(),
            MessageType::Verification
        );
        assert_eq!(
            "notification".parse::<MessageType>().unwrap(),
            MessageType::Notification
        );
        assert_eq!(
            "revocation".parse::<MessageType>().unwrap(),
            MessageType::Revocation
        );
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let result = "Notification".parse::<MessageType>();

        assert!(matches!(
            result,
            Err(WebhookError::UnknownMessageType { .. })
        ));
    }

    #[test]
    fn test_display_matches_header_value() {
        assert_eq!(MessageType::Revocation.to_string(), "revocation");
    }
}

// ============================================================================
// WebhookMessage::classify tests
// ============================================================================

mod classify_tests {
    use super::*;

    #[test]
    fn test_verification_extracts_challenge() {
        let body = br#"{"challenge":"pogchamp-kappa-360noscope-vohiyo","subscription":{"id":"sub-1"}}"#;

        let message = WebhookMessage::classify(Some("webhook_callback_verification"), body).unwrap();

        match message {
            WebhookMessage::Verification {
                challenge,
                subscription_id,
            } => {
                assert_eq!(challenge, "pogchamp-kappa-360noscope-vohiyo");
                assert_eq!(subscription_id.as_deref(), Some("sub-1"));
            }
            other => panic!("expected verification, got {:?}", other),
        }
    }

    #[test]
    fn test_notification_keeps_event_text_verbatim() {
        let message =
            WebhookMessage::classify(Some("notification"), FOLLOW_BODY.as_bytes()).unwrap();

        match message {
            WebhookMessage::Notification(event) => {
                assert_eq!(event.subscription_type, "channel.follow");
                assert_eq!(
                    event.payload(),
                    r#"{"user_id":"1234","user_name":"cool_user","broadcaster_user_name":"streamer"}"#
                );
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_revocation_extracts_subscription_id() {
        let body = br#"{"subscription":{"id":"sub-9","type":"channel.follow","status":"authorization_revoked"}}"#;

        let message = WebhookMessage::classify(Some("revocation"), body).unwrap();

        match message {
            WebhookMessage::Revocation {
                subscription_id,
                status,
                ..
            } => {
                assert_eq!(subscription_id, "sub-9");
                assert_eq!(status.as_deref(), Some("authorization_revoked"));
            }
            other => panic!("expected revocation, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognised_type_is_unknown() {
        let message = WebhookMessage::classify(Some("subscription_ping"), b"not json").unwrap();

        assert!(matches!(
            message,
            WebhookMessage::Unknown { message_type: Some(ref t) } if t == "subscription_ping"
        ));
    }

    #[test]
    fn test_missing_type_is_unknown() {
        let message = WebhookMessage::classify(None, b"{}").unwrap();

        assert!(matches!(
            message,
            WebhookMessage::Unknown { message_type: None }
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let result = WebhookMessage::classify(Some("notification"), b"{not json");

        assert!(matches!(
            result,
            Err(WebhookError::MalformedPayload {
                message_type: MessageType::Notification,
                ..
            })
        ));
    }

    #[test]
    fn test_notification_without_event_is_malformed() {
        let body = br#"{"subscription":{"type":"channel.follow"}}"#;

        let result = WebhookMessage::classify(Some("notification"), body);

        assert!(matches!(result, Err(WebhookError::MalformedPayload { .. })));
    }

    #[test]
    fn test_verification_without_challenge_is_malformed() {
        let result =
            WebhookMessage::classify(Some("webhook_callback_verification"), br#"{"subscription":{}}"#);

        assert!(matches!(result, Err(WebhookError::MalformedPayload { .. })));
    }
}

// ============================================================================
// EventSubProcessor tests
// ============================================================================

mod processor_tests {
    use super::*;

    #[test]
    fn test_verification_returns_challenge() {
        let (processor, _) = processor_with_registry();
        let request = signed_request(
            Some("webhook_callback_verification"),
            r#"{"challenge":"abc123","subscription":{"id":"s"}}"#,
        );

        let outcome = processor.process(&request).unwrap();

        assert!(matches!(outcome, WebhookOutcome::Challenge(ref c) if c == "abc123"));
    }

    #[test]
    fn test_notification_broadcasts_event_field() {
        let (processor, registry) = processor_with_registry();
        let (handle, mut rx) = ConnectionHandle::channel(4);
        registry.insert(registry.next_id(), handle).unwrap();

        let outcome = processor
            .process(&signed_request(Some("notification"), FOLLOW_BODY))
            .unwrap();

        match outcome {
            WebhookOutcome::Notification {
                subscription_type,
                dispatch,
            } => {
                assert_eq!(subscription_type, "channel.follow");
                assert_eq!(
                    dispatch,
                    DispatchOutcome::Broadcast(BroadcastReport {
                        delivered: 1,
                        failed: 0
                    })
                );
            }
            other => panic!("expected notification, got {:?}", other),
        }
        assert_eq!(
            rx.try_recv().unwrap().as_ref(),
            r#"{"user_id":"1234","user_name":"cool_user","broadcaster_user_name":"streamer"}"#
        );
    }

    #[test]
    fn test_revocation_does_not_broadcast() {
        let (processor, registry) = processor_with_registry();
        let (handle, mut rx) = ConnectionHandle::channel(4);
        registry.insert(registry.next_id(), handle).unwrap();

        let outcome = processor
            .process(&signed_request(
                Some("revocation"),
                r#"{"subscription":{"id":"sub-2","type":"channel.follow"}}"#,
            ))
            .unwrap();

        assert!(matches!(outcome, WebhookOutcome::Revoked { ref subscription_id } if subscription_id == "sub-2"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bad_signature_is_rejected_before_parsing() {
        let (processor, _) = processor_with_registry();
        let mut request = signed_request(Some("notification"), FOLLOW_BODY);
        request.body = Bytes::from_static(b"{tampered");

        let err = processor.process(&request).unwrap_err();

        assert!(err.is_authentication_failure());
        assert!(matches!(err, WebhookError::InvalidSignature { ref message_id } if message_id == MESSAGE_ID));
    }

    #[test]
    fn test_missing_signature_header_is_validation_error() {
        let (processor, _) = processor_with_registry();
        let mut request = signed_request(Some("notification"), FOLLOW_BODY);
        request.headers.signature = None;

        let err = processor.process(&request).unwrap_err();

        assert!(matches!(err, WebhookError::Validation(_)));
        assert!(!err.is_authentication_failure());
    }

    #[test]
    fn test_unknown_message_type_after_verification_is_error() {
        let (processor, _) = processor_with_registry();

        let err = processor
            .process(&signed_request(Some("something_else"), "{}"))
            .unwrap_err();

        assert!(matches!(
            err,
            WebhookError::UnknownMessageType { ref message_type } if message_type == "something_else"
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let (processor, _) = processor_with_registry();

        let debug = format!("{:?}", processor);

        assert!(!debug.contains(SECRET));
    }
}
