//! End-to-end tests of the reporting service under concurrent event delivery.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use testrollup::config::JointConfig;
use testrollup::joint::{ChannelNotifier, InMemoryJointStore, JointEvent};
use testrollup::model::{ExecutionRequest, Run};
use testrollup::repository::{InMemoryRepository, ReportRepository};
use testrollup::{
    ExecutionStatus, InboundEvent, JointCoordinator, JointStatus, ReportingService, RequestStatus,
    StatusPriority, TestingStatus,
};

const MEMBERS: usize = 3;
const RUNS_PER_MEMBER: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_joint_report_fires_once_under_concurrent_finishes() {
    let repository = Arc::new(InMemoryRepository::new());
    let (notifier, mut notifications) = ChannelNotifier::channel();
    let coordinator = Arc::new(JointCoordinator::new(
        Arc::new(InMemoryJointStore::new()),
        Arc::new(notifier),
        JointConfig::default().with_cas_max_retries(64),
    ));
    let service = Arc::new(ReportingService::new(
        Arc::clone(&repository),
        Arc::clone(&coordinator),
        StatusPriority::default(),
    ));

    let mut requests = Vec::new();
    let mut runs = Vec::new();
    for m in 0..MEMBERS {
        let request = ExecutionRequest::new(format!("member-{}", m)).with_join_key("release");
        repository
            .save_execution_request(request.clone())
            .await
            .unwrap();
        for r in 0..RUNS_PER_MEMBER {
            let run = Run::new(request.id, Uuid::new_v4(), format!("case-{}", r))
                .with_execution_status(ExecutionStatus::InProgress);
            repository.save_run(run.clone()).await.unwrap();
            runs.push(run);
        }
        service
            .on_joint_member_started("release", request.id, MEMBERS, None)
            .await
            .unwrap();
        requests.push(request);
    }

    // one failed run per member, the rest pass
    let handles: Vec<_> = runs
        .iter()
        .enumerate()
        .map(|(i, run)| {
            let service = Arc::clone(&service);
            let run_id = run.id;
            let status = if i % RUNS_PER_MEMBER == 0 {
                TestingStatus::Failed
            } else {
                TestingStatus::Passed
            };
            tokio::spawn(async move {
                service
                    .dispatch(InboundEvent::RunStatusChanged { run_id, status })
                    .await?;
                service
                    .dispatch(InboundEvent::RunFinished {
                        run_id,
                        execution_status: ExecutionStatus::Finished,
                    })
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for request in &requests {
        let stored = repository
            .get_execution_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RequestStatus::Finished);
        assert_eq!(stored.testing_status, Some(TestingStatus::Failed));
        let rates = stored.rates.expect("request rates");
        assert_eq!(rates.count_of_test_runs, RUNS_PER_MEMBER as u64);
        assert_eq!(rates.passed_rate, 87.5);
        assert_eq!(rates.failed_rate, 12.5);
    }
    assert_eq!(repository.rate_batches(), MEMBERS);

    let joint = coordinator.get("release").await.unwrap().unwrap();
    assert_eq!(joint.status, JointStatus::Completed);
    assert_eq!(joint.finished_count(), MEMBERS);

    let mut triggers = 0;
    while let Ok(event) = notifications.try_recv() {
        if let JointEvent::ReportTriggered {
            execution_request_ids,
            ..
        } = event
        {
            assert_eq!(execution_request_ids.len(), MEMBERS);
            triggers += 1;
        }
    }
    assert_eq!(triggers, 1);
}

#[tokio::test]
async fn test_service_consumes_event_channel() {
    let repository = Arc::new(InMemoryRepository::new());
    let coordinator = Arc::new(JointCoordinator::new(
        Arc::new(InMemoryJointStore::new()),
        Arc::new(testrollup::joint::NoopNotifier),
        JointConfig::default(),
    ));
    let service = ReportingService::new(
        Arc::clone(&repository),
        coordinator,
        StatusPriority::default(),
    );

    let request = ExecutionRequest::new("er");
    repository
        .save_execution_request(request.clone())
        .await
        .unwrap();
    let run = Run::new(request.id, Uuid::new_v4(), "case");
    repository.save_run(run.clone()).await.unwrap();

    let (sender, receiver) = mpsc::channel(4);
    let producer = tokio::spawn(async move {
        for event in [
            InboundEvent::RunStatusChanged {
                run_id: run.id,
                status: TestingStatus::Skipped,
            },
            InboundEvent::RunFinished {
                run_id: run.id,
                execution_status: ExecutionStatus::Stopped,
            },
        ] {
            sender.send(event).await.unwrap();
        }
    });

    let summary = service.run(receiver).await;
    producer.await.unwrap();
    assert_eq!(summary.handled, 2);
    assert_eq!(summary.failed, 0);

    let stored = repository
        .get_execution_request(request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RequestStatus::Finished);
    // a request with only skipped runs has nothing to rate
    let rates = stored.rates.expect("request rates");
    assert_eq!(rates.count_of_test_runs, 0);
    assert_eq!(rates.passed_rate, 0.0);
}
