//! End-to-end API tests against a server bound to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use taskforge_engine::{Task, TaskConfig, TaskManager, TaskStatus, UpdateHub, WorkerConfig};
use taskforge_server::dto::{ErrorResponse, HealthResponse, TaskListResponse, TaskStatsResponse};
use taskforge_server::routes::router;
use taskforge_server::state::AppState;
use tokio_util::sync::CancellationToken;

async fn spawn_app() -> String {
    let manager = Arc::new(
        TaskManager::new(
            WorkerConfig {
                min_workers: 2,
                max_workers: 2,
                enable_auto_scaling: false,
                shutdown_timeout: Duration::from_secs(5),
                ..WorkerConfig::default()
            },
            TaskConfig {
                queue_capacity: 16,
                ..TaskConfig::default()
            },
        )
        .unwrap(),
    );
    manager.start();

    let hub = UpdateHub::start();
    let updates = manager.take_update_receiver().unwrap();
    tokio::spawn(taskforge_server::pump::run(
        updates,
        hub.clone(),
        Arc::clone(&manager),
        CancellationToken::new(),
    ));

    let state = AppState { manager, hub };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    format!("http://{addr}")
}

async fn poll_task(client: &reqwest::Client, base: &str, id: &str) -> Task {
    for _ in 0..200 {
        let task: Task = client
            .get(format!("{base}/api/v1/tasks/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {id} never reached a terminal state");
}

#[tokio::test]
async fn health_endpoint_responds() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let body: HealthResponse = res.json().await.unwrap();
    assert_eq!(body.status, "healthy");
}

#[tokio::test]
async fn submit_then_poll_until_completed() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/api/v1/tasks"))
        .json(&json!({"name": "example_task", "payload": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    let submitted: Task = res.json().await.unwrap();
    assert_eq!(submitted.status, TaskStatus::Pending);

    let done = poll_task(&client, &base, &submitted.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    let result = done.result.expect("completed task must carry a result");
    assert_eq!(result["data"], Value::String("hello".into()));
}

#[tokio::test]
async fn list_and_stats_agree() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    for i in 0..3 {
        let res = client
            .post(format!("{base}/api/v1/tasks"))
            .json(&json!({"name": "example_task", "payload": i}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    }

    let list: TaskListResponse = client
        .get(format!("{base}/api/v1/tasks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.total, 3);
    assert_eq!(list.tasks.len(), 3);

    let stats: TaskStatsResponse = client
        .get(format!("{base}/api/v1/tasks/status/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.stats.values().sum::<usize>(), 3);

    // Wait for everything to finish, then the filter should find them all.
    let ids: Vec<String> = list.tasks.iter().map(|t| t.id.clone()).collect();
    for id in &ids {
        poll_task(&client, &base, id).await;
    }
    let completed: TaskListResponse = client
        .get(format!("{base}/api/v1/tasks?status=completed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(completed.total, 3);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{base}/api/v1/tasks/no-such-task"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
    let body: ErrorResponse = res.json().await.unwrap();
    assert!(body.error.contains("no-such-task"));

    let res = client
        .delete(format!("{base}/api/v1/tasks/no-such-task"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_long_running_task() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let submitted: Task = client
        .post(format!("{base}/api/v1/tasks"))
        .json(&json!({"name": "long_running_task", "payload": null}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let res = client
        .delete(format!("{base}/api/v1/tasks/{}", submitted.id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);

    let task: Task = client
        .get(format!("{base}/api/v1/tasks/{}", submitted.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.completed_at.is_some());
}
