//! End-to-end behaviour of `SyncContext` against an in-memory backend.

mod support;

use std::time::Duration;

use haven::ReadOptions;
use haven_core::testing::MockResponse;
use haven_domain::{
    CacheRead, CourseEnrollment, CourseProgress, DataSource, EntityData, EntityType, HavenError, MutationKind,
    MutationPayload, OutboxStatus, WriteOutcome,
};
use support::*;

fn queued_id(outcome: &WriteOutcome) -> String {
    match outcome {
        WriteOutcome::AcceptedOffline { item_id, .. } => item_id.clone(),
        other => panic!("expected AcceptedOffline, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_submit_is_accepted_without_network() -> anyhow::Result<()> {
    let h = harness(test_config(false, true)).await;

    let outcome =
        h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?;
    assert!(outcome.is_accepted_offline());
    assert_eq!(outcome.user_message(), "Saved. Will sync when you're back online.");

    let items = h.context.outbox_items().await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, OutboxStatus::Pending);
    assert_eq!(h.remote.submit_calls(), 0);

    h.context.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn connectivity_restored_syncs_queue() -> anyhow::Result<()> {
    let h = harness(test_config(false, true)).await;
    let outcome =
        h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?;
    let id = queued_id(&outcome);

    h.context.connectivity_monitor().set_online(true);
    let item = wait_for_status(&h.context, &id, OutboxStatus::Synced).await;
    assert_eq!(item.attempts, 0);
    assert_eq!(h.remote.effect_count(), 1);

    h.context.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn client_error_fails_without_retry() -> anyhow::Result<()> {
    let h = harness(test_config(false, false)).await;
    let id = queued_id(
        &h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?,
    );

    h.remote.script_mutations([MockResponse::Status(400)]);
    h.context.connectivity_monitor().set_online(true);
    let report = h.context.sync_now().await?;
    assert_eq!(report.failed, 1);

    let failed = h.context.failed_mutations().await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert_eq!(failed[0].attempts, 1);

    h.context.sync_now().await?;
    assert_eq!(h.remote.submit_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn server_errors_back_off_then_sync() -> anyhow::Result<()> {
    let h = harness(test_config(false, true)).await;
    let id = queued_id(
        &h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?,
    );

    h.remote.script_mutations([
        MockResponse::Status(503),
        MockResponse::Status(503),
        MockResponse::Status(503),
    ]);
    h.context.connectivity_monitor().set_online(true);

    let item = wait_for_status(&h.context, &id, OutboxStatus::Synced).await;
    assert_eq!(item.attempts, 3);
    assert_eq!(h.remote.submit_calls(), 4);
    assert_eq!(h.remote.effect_count(), 1);

    h.context.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn stale_cache_is_served_offline_without_refresh() -> anyhow::Result<()> {
    let clock = manual_clock();
    let h = harness_with_clock(test_config(true, false), clock.clone()).await;
    h.remote.set_list(EntityType::Course, vec![course("c1", "Intro to Python")]);

    let fresh = h.context.list_entities(EntityType::Course, ReadOptions::default()).await?;
    assert_eq!(fresh.as_hit().map(|hit| hit.source), Some(DataSource::Network));

    h.context.connectivity_monitor().set_online(false);
    clock.advance(chrono::Duration::minutes(11));

    let read = h.context.list_entities(EntityType::Course, ReadOptions::default()).await?;
    let CacheRead::Hit(hit) = read else { panic!("expected a cache hit") };
    assert!(hit.is_stale);
    assert_eq!(hit.source, DataSource::Cache);
    assert!(hit.staleness_notice().is_some());
    assert!(matches!(hit.data, EntityData::List { ref items, .. } if items.len() == 1));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.remote.list_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn offline_miss_is_not_an_error() -> anyhow::Result<()> {
    let h = harness(test_config(false, false)).await;
    let read = h.context.get_entity(EntityType::Job, "job-9", ReadOptions::default()).await?;
    assert!(read.is_miss());
    assert!(!h.context.is_available_offline(EntityType::Job, "job-9").await?);
    Ok(())
}

#[tokio::test]
async fn rejected_online_write_is_not_queued() {
    let h = harness(test_config(true, false)).await;
    h.remote.script_mutations([MockResponse::Status(422)]);

    let err = h
        .context
        .submit_mutation(MutationKind::JobApplication, "job-1", job_application())
        .await
        .unwrap_err();
    assert!(matches!(err, HavenError::ServerRejected { status: 422, .. }));
    assert!(h.context.outbox_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn lost_response_is_not_applied_twice() -> anyhow::Result<()> {
    let h = harness(test_config(true, false)).await;
    h.remote.script_mutations([MockResponse::ApplyThenHang]);

    let outcome =
        h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?;
    let id = queued_id(&outcome);
    let queued = h.context.outbox_items().await?;
    assert!(queued[0].next_attempt_at.is_some());

    // First retry is held back by the base backoff.
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.context.sync_now().await?;
    wait_for_status(&h.context, &id, OutboxStatus::Synced).await;

    let submitted = h.remote.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].idempotency_key, submitted[1].idempotency_key);
    assert_eq!(h.remote.effect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn rapid_progress_updates_all_reach_the_server() -> anyhow::Result<()> {
    let h = harness(test_config(false, false)).await;
    for module in ["m1", "m2", "m3", "m4"] {
        let payload = MutationPayload::CourseProgress(CourseProgress {
            module_id: Some(module.into()),
            progress_percentage: 100.0,
            completed: true,
        });
        h.context.submit_mutation(MutationKind::CourseProgress, "c1", payload).await?;
    }
    assert_eq!(h.context.outbox_items().await?.len(), 4);

    h.context.connectivity_monitor().set_online(true);
    let report = h.context.sync_now().await?;

    assert_eq!(report.synced, 4);
    assert_eq!(h.remote.effect_count(), 4);
    Ok(())
}

#[tokio::test]
async fn kinds_drain_independently_in_order() -> anyhow::Result<()> {
    let h = harness(test_config(false, false)).await;
    for job in ["job-1", "job-2", "job-3"] {
        h.context.submit_mutation(MutationKind::JobApplication, job, job_application()).await?;
    }
    h.context
        .submit_mutation(
            MutationKind::CourseEnrollment,
            "course-1",
            MutationPayload::CourseEnrollment(CourseEnrollment {}),
        )
        .await?;

    h.remote.fail_target("job-1", MockResponse::Status(503));
    h.context.connectivity_monitor().set_online(true);
    let report = h.context.sync_now().await?;

    assert_eq!(report.synced, 1);
    assert_eq!(report.retried, 1);
    let mut targets = h.remote.submitted_targets();
    targets.sort();
    assert_eq!(targets, vec!["course-1", "job-1"]);
    assert!(report.next_retry_at.is_some());
    Ok(())
}

#[tokio::test]
async fn speculative_wake_while_offline_does_nothing() -> anyhow::Result<()> {
    let h = harness(test_config(false, true)).await;
    let id = queued_id(
        &h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?,
    );

    assert_eq!(h.wake.fire(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.remote.submit_calls(), 0);

    h.context.connectivity_monitor().set_online(true);
    wait_for_status(&h.context, &id, OutboxStatus::Synced).await;
    h.context.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn online_write_that_fails_is_retried_in_background() -> anyhow::Result<()> {
    let h = harness(test_config(true, true)).await;
    h.remote.script_mutations([MockResponse::Status(502)]);

    let outcome =
        h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?;
    let id = queued_id(&outcome);

    wait_for_status(&h.context, &id, OutboxStatus::Synced).await;
    assert_eq!(h.remote.effect_count(), 1);
    h.context.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn resubmit_queues_a_fresh_copy() -> anyhow::Result<()> {
    let h = harness(test_config(false, false)).await;
    let failed_id = queued_id(
        &h.context.submit_mutation(MutationKind::JobApplication, "job-1", job_application()).await?,
    );
    h.remote.script_mutations([MockResponse::Status(409)]);
    h.context.connectivity_monitor().set_online(true);
    h.context.sync_now().await?;

    let outcome = h.context.resubmit(&failed_id).await?;
    assert_ne!(outcome.item.id, failed_id);
    h.context.sync_now().await?;

    let items = h.context.outbox_items().await?;
    let statuses: Vec<_> = items.iter().map(|i| (i.id.clone(), i.status)).collect();
    assert!(statuses.contains(&(failed_id, OutboxStatus::Failed)));
    assert!(statuses.contains(&(outcome.item.id, OutboxStatus::Synced)));
    Ok(())
}
