use super::*;
use serde_json::json;

fn leased_message() -> Message {
    Message {
        id: MessageId::new(12),
        delivery_count: 2,
        enqueued_at: Timestamp::now(),
        visible_at: Timestamp::now(),
        payload: json!({ "email": "a@example.com", "retries": 0 }),
    }
}

#[test]
fn test_job_mirrors_leased_message() {
    let queue = QueueName::new("emails").unwrap();
    let message = leased_message();

    let job = Job::from_message(&queue, &message);

    assert_eq!(job.id, message.id);
    assert_eq!(job.attempts_made, 2);
    assert_eq!(job.queue, queue);
    assert_eq!(job.data, message.payload);
    assert_eq!(job.enqueued_at, message.enqueued_at);
}

#[test]
fn test_job_data_as() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Email {
        email: String,
    }

    let job = Job::from_message(&QueueName::new("emails").unwrap(), &leased_message());

    let email: Email = job.data_as().unwrap();
    assert_eq!(email.email, "a@example.com");

    assert!(job.data_as::<Vec<u32>>().is_err());
}
