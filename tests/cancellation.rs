mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{jpeg, not_found, ocr, ok, Call, FakeApi, Reply};
use order_intake::api::ApiResponse;
use order_intake::error::UploadError;
use order_intake::metrics::metric_names;
use order_intake::orchestrator::{NetworkFailure, Step, UploadOrchestrator, UploadOutcome};
use order_intake::state_machine::{Control, UploadState};
use serde_json::json;

fn orchestrator(api: &Arc<FakeApi>) -> Arc<UploadOrchestrator<FakeApi>> {
    Arc::new(UploadOrchestrator::new(api.clone(), &common::config()))
}

async fn wait_for_uploading(orch: &UploadOrchestrator<FakeApi>) {
    let mut rx = orch.subscribe();
    rx.wait_for(|s| s.state == UploadState::Uploading).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_while_uploading_returns_to_initial() {
    let api = Arc::new(FakeApi::default());
    api.push_recognize(Reply::Hang);
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();

    let task = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    wait_for_uploading(&orch).await;

    assert!(orch.cancel().unwrap());
    let result = task.await.unwrap();
    assert!(matches!(result, Err(UploadError::Cancelled)));
    assert_eq!(orch.state(), UploadState::Initial);
    assert!(orch.selected_file().is_none());
    assert_eq!(api.count(|c| matches!(c, Call::Create(_))), 0);
    assert_eq!(orch.metrics().summary()[metric_names::CANCEL_LATENCY].count, 1);
}

#[tokio::test(start_paused = true)]
async fn late_response_after_cancel_changes_nothing() {
    let api = Arc::new(FakeApi::default());
    api.push_recognize(Reply::After(Duration::from_secs(5), ApiResponse::ok(ocr("GB1001"))));
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();

    let task = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    wait_for_uploading(&orch).await;
    orch.cancel().unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(matches!(task.await.unwrap(), Err(UploadError::Cancelled)));
    assert_eq!(orch.state(), UploadState::Initial);
    assert_eq!(api.calls(), vec![Call::Recognize("shot.jpg".into())]);
}

#[tokio::test(start_paused = true)]
async fn new_sequence_after_cancel_is_unaffected_by_the_old_one() {
    let api = Arc::new(FakeApi::default());
    api.push_recognize(Reply::Hang);
    api.push_recognize(ok(ocr("GB7007")));
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();

    let stale = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    wait_for_uploading(&orch).await;
    orch.cancel().unwrap();

    let outcome = orch.upload(jpeg(2048)).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Success { ref order_code, .. } if order_code == "GB7007"));
    assert!(matches!(stale.await.unwrap(), Err(UploadError::Cancelled)));
    assert_eq!(orch.state(), UploadState::Success);
}

#[tokio::test(start_paused = true)]
async fn second_submit_while_in_flight_is_rejected() {
    let api = Arc::new(FakeApi::default());
    api.push_recognize(Reply::After(Duration::from_secs(2), ApiResponse::ok(ocr("GB1001"))));
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    wait_for_uploading(&orch).await;

    assert!(matches!(orch.submit().await, Err(UploadError::Busy)));
    assert!(matches!(orch.select_file(jpeg(10)), Err(UploadError::Busy)));
    assert!(first.await.unwrap().is_ok());
    assert_eq!(api.count(|c| matches!(c, Call::Recognize(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_recognition_times_out() {
    let api = Arc::new(FakeApi::default());
    api.push_recognize(Reply::Hang);
    let orch = orchestrator(&api);

    let outcome = orch.upload(jpeg(1024)).await.unwrap();
    assert_eq!(
        outcome,
        UploadOutcome::NetworkFailed(NetworkFailure::Timeout { step: Step::Recognize })
    );
    assert_eq!(orch.state(), UploadState::OcrFailed);

    let retried = orch.submit().await.unwrap();
    assert!(matches!(retried, UploadOutcome::Success { ref order_code, .. } if order_code == "GB1001"));
    assert_eq!(api.count(|c| matches!(c, Call::Recognize(_))), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_duplicate_check_is_unavailable_not_fatal() {
    let api = Arc::new(FakeApi::default());
    api.push_check(Reply::Hang);
    let orch = orchestrator(&api);

    let outcome = orch.upload(jpeg(1024)).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Success { check_unavailable: true, .. }));
}

#[tokio::test(start_paused = true)]
async fn slow_persist_times_out() {
    let api = Arc::new(FakeApi::default());
    api.push_create(Reply::Hang);
    let orch = orchestrator(&api);

    let outcome = orch.upload(jpeg(1024)).await.unwrap();
    assert_eq!(
        outcome,
        UploadOutcome::NetworkFailed(NetworkFailure::Timeout { step: Step::Persist })
    );
    assert_eq!(orch.state(), UploadState::OcrFailed);
    assert_eq!(orch.view().submit, Control::Enabled);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_duplicate_check_returns_to_initial() {
    let api = Arc::new(FakeApi::default());
    api.push_check(Reply::After(Duration::from_secs(5), ApiResponse::ok(not_found())));
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();
    let mut rx = orch.subscribe();

    let task = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    rx.wait_for(|s| s.progress == 50).await.unwrap();
    assert_eq!(api.calls().last(), Some(&Call::Check("GB1001".into())));

    assert!(orch.cancel().unwrap());
    assert!(matches!(task.await.unwrap(), Err(UploadError::Cancelled)));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(orch.state(), UploadState::Initial);
    assert_eq!(api.count(|c| matches!(c, Call::Create(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_persist_returns_to_initial() {
    let api = Arc::new(FakeApi::default());
    api.push_create(Reply::After(Duration::from_secs(5), ApiResponse::ok(json!({ "id": 9 }))));
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();
    let mut rx = orch.subscribe();

    let task = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    rx.wait_for(|s| s.progress == 80).await.unwrap();
    assert_eq!(api.calls().last(), Some(&Call::Create("GB1001".into())));

    assert!(orch.cancel().unwrap());
    assert!(matches!(task.await.unwrap(), Err(UploadError::Cancelled)));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(orch.state(), UploadState::Initial);
    assert!(orch.selected_file().is_none());
    assert!(api.created.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn progress_steps_are_published_one_by_one() {
    let api = Arc::new(FakeApi::default());
    api.push_check(Reply::After(Duration::from_secs(1), ApiResponse::ok(not_found())));
    api.push_create(Reply::After(Duration::from_secs(1), ApiResponse::ok(json!({ "id": 1 }))));
    let orch = orchestrator(&api);
    orch.select_file(jpeg(1024)).unwrap();
    let mut rx = orch.subscribe();

    let task = tokio::spawn({
        let orch = orch.clone();
        async move { orch.submit().await }
    });
    for step in [50, 80] {
        let seen = *rx.wait_for(|s| s.progress >= step).await.unwrap();
        assert_eq!(seen.progress, step);
        assert_eq!(seen.state, UploadState::Uploading);
    }
    assert!(task.await.unwrap().is_ok());
    assert_eq!(rx.borrow().progress, 100);
}
