//! Tests for consumer error types.

use super::*;

#[derive(Debug, thiserror::Error)]
#[error("payment declined")]
struct PaymentError {
    #[source]
    source: std::io::Error,
}

#[test]
fn test_handler_error_from_std_error_records_cause_chain() {
    let err = PaymentError {
        source: std::io::Error::new(std::io::ErrorKind::TimedOut, "gateway timeout"),
    };

    let handler_error = HandlerError::from(err);

    assert_eq!(handler_error.message, "payment declined");
    assert_eq!(
        handler_error.details.as_deref(),
        Some("Caused by: gateway timeout")
    );
}

#[test]
fn test_handler_error_without_cause_has_no_details() {
    let handler_error: HandlerError =
        std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();

    assert_eq!(handler_error.to_string(), "disk full");
    assert!(handler_error.details.is_none());
}

/// `?` accepts both foreign errors and `HandlerError` itself in handler bodies
#[test]
fn test_question_mark_converts_foreign_and_own_errors() {
    fn non_zero(value: u32) -> Result<u32, HandlerError> {
        match value {
            0 => Err(HandlerError::new("zero is not a valid order id")),
            n => Ok(n),
        }
    }

    fn parse(input: &str) -> Result<u32, HandlerError> {
        let value: u32 = input.parse()?;
        let value = non_zero(value)?;
        Ok(value)
    }

    assert_eq!(parse("7"), Ok(7));
    assert_eq!(
        parse("0").unwrap_err().message,
        "zero is not a valid order id"
    );
    assert_eq!(
        parse("seven").unwrap_err().message,
        "invalid digit found in string"
    );
}

#[test]
fn test_handler_error_builder() {
    let err = HandlerError::new("bad input").with_details("field `id` missing");
    assert_eq!(err.message, "bad input");
    assert_eq!(err.details.as_deref(), Some("field `id` missing"));
}

#[test]
fn test_handler_error_from_panic_payload() {
    let from_str = HandlerError::from_panic(Box::new("boom"));
    assert_eq!(from_str.message, "handler panicked: boom");

    let from_string = HandlerError::from_panic(Box::new("kaboom".to_string()));
    assert_eq!(from_string.message, "handler panicked: kaboom");

    let opaque = HandlerError::from_panic(Box::new(42_u8));
    assert_eq!(opaque.message, "handler panicked: unknown panic payload");
}

#[test]
fn test_consumer_error_classification() {
    let queue = QueueName::new("orders").unwrap();

    let not_found = ConsumerError::DeadLetterNotFound {
        queue: queue.dead_letter_queue(),
        message_id: MessageId::new(3),
    };
    assert!(not_found.is_not_found());
    assert!(!not_found.is_transient());

    let store_missing = ConsumerError::from(StoreError::QueueNotFound {
        queue_name: "orders".to_string(),
    });
    assert!(store_missing.is_not_found());

    let connection = ConsumerError::from(StoreError::ConnectionFailed {
        message: "refused".to_string(),
    });
    assert!(connection.is_transient());
    assert!(!connection.is_not_found());

    assert!(!ConsumerError::AlreadyStarted.is_transient());
}

#[test]
fn test_shutdown_timeout_message() {
    let err = ConsumerError::ShutdownTimeout {
        active: 2,
        timeout: Duration::from_secs(5),
    };
    assert_eq!(
        err.to_string(),
        "Shutdown timed out after 5s with 2 job(s) still running"
    );
}
