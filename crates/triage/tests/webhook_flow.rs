//! End-to-end: HTTP delivery through the gate into spawned pipeline runs.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use shared_types::{Notification, NotificationBatch};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use triage::classifier::{
    Classification, ClassificationInput, Classifier, ClassifyError, SuggestedTask,
};
use triage::config::DedupSettings;
use triage::gate::NotificationGate;
use triage::models::{CreatedTask, EmailMessage, ImageAttachment, NewTask, Subscription};
use triage::provider::{self, Mailbox, ProviderError, Subscriptions};
use triage::services::{Pipeline, SpawnSink};
use triage::{build_router, AppState, TriageConfig};

#[derive(Default)]
struct Inbox {
    fetches: AtomicUsize,
    tasks: Mutex<Vec<NewTask>>,
    moves: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailbox for Inbox {
    async fn fetch_message(&self, message_id: &str) -> provider::Result<EmailMessage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if message_id == "deleted" {
            return Err(ProviderError::NotFound(message_id.to_string()));
        }
        Ok(EmailMessage {
            id: message_id.to_string(),
            subject: format!("Subject of {}", message_id),
            from: None,
            body: "Body".to_string(),
            has_attachments: false,
        })
    }

    async fn list_image_attachments(
        &self,
        _message_id: &str,
    ) -> provider::Result<Vec<ImageAttachment>> {
        Ok(Vec::new())
    }

    async fn move_message(&self, message_id: &str, folder_path: &str) -> provider::Result<()> {
        self.moves
            .lock()
            .unwrap()
            .push((message_id.to_string(), folder_path.to_string()));
        Ok(())
    }

    async fn create_task(&self, task: &NewTask) -> provider::Result<CreatedTask> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(CreatedTask {
            id: "task-1".to_string(),
            title: task.title.clone(),
            newly_created: true,
        })
    }
}

#[async_trait]
impl Subscriptions for Inbox {
    async fn create_subscription(
        &self,
        _notification_url: &str,
        _client_state: &str,
    ) -> provider::Result<Subscription> {
        Err(ProviderError::Unexpected("not used".to_string()))
    }

    async fn renew_all_subscriptions(&self) -> provider::Result<usize> {
        Ok(1)
    }
}

/// Always answers with a category that is not configured
struct OffListClassifier;

#[async_trait]
impl Classifier for OffListClassifier {
    async fn describe_image(&self, _image: &ImageAttachment) -> Result<String, ClassifyError> {
        Err(ClassifyError::VisionDisabled)
    }

    async fn classify(
        &self,
        _input: &ClassificationInput,
    ) -> Result<Classification, ClassifyError> {
        Ok(Classification {
            category: Some("Travel".to_string()),
            confidence: 0.4,
            is_actionable: true,
            task: SuggestedTask {
                title: None,
                summary: None,
                due_date: None,
            },
        })
    }
}

fn server(inbox: Arc<Inbox>) -> axum::Router {
    let config = Arc::new(TriageConfig::example());
    let pipeline = Arc::new(Pipeline::new(
        inbox.clone(),
        Arc::new(OffListClassifier),
        config,
    ));
    let gate = NotificationGate::new(
        "secret",
        DedupSettings::default(),
        Arc::new(SpawnSink::new(pipeline)),
    );

    build_router(AppState {
        gate: Arc::new(gate),
        subscriptions: inbox,
        client_state: Arc::from("secret"),
    })
}

fn delivery(message_id: &str, client_state: &str) -> Request<Body> {
    let batch = NotificationBatch {
        value: vec![Notification::message_created(
            "me@example.com",
            message_id,
            client_state,
            "sub-1",
        )],
    };
    Request::post("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&batch).unwrap()))
        .unwrap()
}

async fn wait_for_moves(inbox: &Inbox, expected: usize) {
    for _ in 0..100 {
        if inbox.moves.lock().unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn duplicate_deliveries_run_the_pipeline_once() {
    let inbox = Arc::new(Inbox::default());
    let app = server(inbox.clone());

    for _ in 0..3 {
        let response = app.clone().oneshot(delivery("msg-1", "secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    wait_for_moves(&inbox, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(inbox.fetches.load(Ordering::SeqCst), 1);
    let moves = inbox.moves.lock().unwrap();
    assert_eq!(*moves, vec![("msg-1".to_string(), "Inbox/Important".to_string())]);
    assert_eq!(inbox.tasks.lock().unwrap()[0].title, "Follow up: Subject of msg-1");
}

#[tokio::test]
async fn forged_client_state_never_reaches_the_mailbox() {
    let inbox = Arc::new(Inbox::default());
    let app = server(inbox.clone());

    let response = app.oneshot(delivery("msg-1", "guess")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(inbox.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deleted_message_is_acknowledged_but_not_filed() {
    let inbox = Arc::new(Inbox::default());
    let app = server(inbox.clone());

    let response = app.oneshot(delivery("deleted", "secret")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    for _ in 0..100 {
        if inbox.fetches.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(inbox.fetches.load(Ordering::SeqCst), 1);
    assert!(inbox.tasks.lock().unwrap().is_empty());
    assert!(inbox.moves.lock().unwrap().is_empty());
}

#[tokio::test]
async fn category_file_round_trips_through_disk() {
    let dir = std::env::temp_dir().join(format!("triage-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let good = dir.join("config.json");
    std::fs::write(&good, serde_json::to_string_pretty(&TriageConfig::example()).unwrap()).unwrap();
    assert_ok!(TriageConfig::load(&good));

    let bad = dir.join("broken.json");
    std::fs::write(&bad, r#"{"default_category": "X", "categories": []}"#).unwrap();
    assert_err!(TriageConfig::load(&bad));

    std::fs::remove_dir_all(&dir).ok();
}
