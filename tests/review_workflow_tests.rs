mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use uuid::Uuid;

use business_review_core::error::ServiceError;
use business_review_core::models::{BusinessVerificationStatus, ReviewAction};

use common::{app_state, registration_request, reviewer};

#[tokio::test]
async fn approval_materializes_business_with_single_primary() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    assert_eq!(registration.status, BusinessVerificationStatus::Pending);

    let (reviewer_id, reviewer_name) = reviewer();
    let outcome = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Approve,
            Some(reviewer_id),
            Some(reviewer_name),
            Some("Documents verified".to_string()),
            None,
        )
        .await
        .unwrap();

    let business = outcome.business.expect("business created on approval");
    assert_eq!(outcome.registration.status, BusinessVerificationStatus::Approved);
    assert_eq!(outcome.registration.business_id, Some(business.business.id));
    assert_eq!(business.business.registration_id, Some(registration.id));
    assert_eq!(business.locations.len(), 1);
    assert!(business.locations[0].is_primary);
    assert_eq!(business.locations[0].formatted_address, registration.address);

    let stored = state.hierarchy.get_business(business.business.id).await.unwrap();
    assert_eq!(stored.locations.len(), 1);
}

#[tokio::test]
async fn re_approval_keeps_one_business_and_records_event() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    let first = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Approve,
            Some(reviewer_id),
            Some(reviewer_name.clone()),
            None,
            None,
        )
        .await
        .unwrap();
    let second = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Approve,
            Some(reviewer_id),
            Some(reviewer_name),
            None,
            None,
        )
        .await
        .unwrap();

    assert!(first.business.is_some());
    assert!(second.business.is_none());
    assert_eq!(second.registration.business_id, first.registration.business_id);

    let owned = state
        .hierarchy
        .list_businesses_for_user(registration.user_id)
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    let business = state.hierarchy.get_business(owned[0].id).await.unwrap();
    assert_eq!(business.locations.len(), 1);

    let history = state.reviews.get_with_history(registration.id).await.unwrap();
    assert_eq!(history.history.len(), 2);
}

#[tokio::test]
async fn reject_without_reason_fails_and_appends_nothing() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    for reason in [None, Some("   ".to_string())] {
        let err = state
            .reviews
            .apply_action(
                registration.id,
                ReviewAction::Reject,
                Some(reviewer_id),
                Some(reviewer_name.clone()),
                None,
                reason,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }), "got {err:?}");
    }

    let history = state.reviews.get_with_history(registration.id).await.unwrap();
    assert!(history.history.is_empty());
    assert_eq!(history.registration.status, BusinessVerificationStatus::Pending);
}

#[tokio::test]
async fn suspend_from_pending_is_an_invalid_transition() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    let err = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Suspend,
            Some(reviewer_id),
            Some(reviewer_name),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }), "got {err:?}");

    let history = state.reviews.get_with_history(registration.id).await.unwrap();
    assert_eq!(history.registration.status, BusinessVerificationStatus::Pending);
    assert!(history.history.is_empty());
}

#[tokio::test]
async fn events_follow_call_order() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    let actions = [
        ReviewAction::Comment,
        ReviewAction::RequestMoreInfo,
        ReviewAction::Comment,
        ReviewAction::Approve,
        ReviewAction::Suspend,
        ReviewAction::Resume,
    ];
    for action in actions {
        state
            .reviews
            .apply_action(
                registration.id,
                action,
                Some(reviewer_id),
                Some(reviewer_name.clone()),
                Some(format!("step {action}")),
                None,
            )
            .await
            .unwrap();
    }

    let history = state.reviews.get_with_history(registration.id).await.unwrap();
    let recorded: Vec<_> = history.history.iter().map(|e| e.action).collect();
    assert_eq!(recorded, actions.to_vec());
    assert!(history
        .history
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
    assert_eq!(history.registration.status, BusinessVerificationStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_approvals_record_every_event_and_one_business() {
    let state = Arc::new(app_state());
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let registration_id = registration.id;

    let tasks = (0..10).map(|_| {
        let state = state.clone();
        let (reviewer_id, reviewer_name) = reviewer();
        tokio::spawn(async move {
            state
                .reviews
                .apply_action(
                    registration_id,
                    ReviewAction::Approve,
                    Some(reviewer_id),
                    Some(reviewer_name),
                    None,
                    None,
                )
                .await
        })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.business.is_some()).count(), 1);
    let owned = state
        .hierarchy
        .list_businesses_for_user(registration.user_id)
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);

    let history = state.reviews.get_with_history(registration.id).await.unwrap();
    assert_eq!(history.history.len(), 10);
    assert!(history
        .history
        .iter()
        .all(|e| e.action == ReviewAction::Approve));
}

#[tokio::test]
async fn resume_after_suspended_review_materializes_business() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    state
        .reviews
        .claim_for_review(registration.id, reviewer_id, reviewer_name.clone())
        .await
        .unwrap();
    let suspended = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Suspend,
            Some(reviewer_id),
            Some(reviewer_name.clone()),
            Some("Awaiting health inspection".to_string()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(suspended.registration.status, BusinessVerificationStatus::Suspended);
    assert!(suspended.business.is_none());
    assert_eq!(suspended.registration.business_id, None);

    let resumed = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Resume,
            Some(reviewer_id),
            Some(reviewer_name),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(resumed.registration.status, BusinessVerificationStatus::Approved);
    let business = resumed.business.expect("resume materializes the business");
    assert_eq!(resumed.registration.business_id, Some(business.business.id));
    assert_eq!(business.locations.len(), 1);
    assert!(business.locations[0].is_primary);

    let stored = state.hierarchy.get_business(business.business.id).await.unwrap();
    assert_eq!(stored.locations.iter().filter(|l| l.is_primary).count(), 1);
}

#[tokio::test]
async fn comment_never_changes_status_and_rejected_is_terminal() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    let commented = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Comment,
            Some(reviewer_id),
            Some(reviewer_name.clone()),
            Some("Waiting for tax certificate".to_string()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(commented.registration.status, BusinessVerificationStatus::Pending);

    let rejected = state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Reject,
            Some(reviewer_id),
            Some(reviewer_name.clone()),
            None,
            Some("Tax id does not match".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(rejected.registration.status, BusinessVerificationStatus::Rejected);
    assert_eq!(
        rejected.registration.rejection_reason.as_deref(),
        Some("Tax id does not match")
    );

    for action in [ReviewAction::Comment, ReviewAction::Approve, ReviewAction::Resume] {
        let err = state
            .reviews
            .apply_action(
                registration.id,
                action,
                Some(reviewer_id),
                Some(reviewer_name.clone()),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }), "got {err:?}");
    }
}

#[tokio::test]
async fn claim_moves_pending_to_under_review() {
    let state = app_state();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();

    let outcome = state
        .reviews
        .claim_for_review(registration.id, reviewer_id, reviewer_name.clone())
        .await
        .unwrap();
    assert_eq!(outcome.registration.status, BusinessVerificationStatus::UnderReview);
    assert_eq!(outcome.registration.reviewer_id, Some(reviewer_id));
    assert_eq!(outcome.event.action, ReviewAction::Comment);

    let again = state
        .reviews
        .claim_for_review(registration.id, reviewer_id, reviewer_name)
        .await
        .unwrap_err();
    assert!(matches!(again, ServiceError::InvalidTransition { .. }));

    let pending = state.reviews.list_pending(50, 0).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, BusinessVerificationStatus::UnderReview);
}

#[tokio::test]
async fn pending_queue_is_oldest_first_and_excludes_decided() {
    let state = app_state();
    let (reviewer_id, reviewer_name) = reviewer();

    let mut ids = Vec::new();
    for name in ["First Cafe", "Second Cafe", "Third Cafe"] {
        let registration = state
            .registrations
            .submit(registration_request(Uuid::new_v4(), name))
            .await
            .unwrap();
        ids.push(registration.id);
        // Distinct submission instants keep the queue order deterministic.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    state
        .reviews
        .apply_action(
            ids[1],
            ReviewAction::Approve,
            Some(reviewer_id),
            Some(reviewer_name),
            None,
            None,
        )
        .await
        .unwrap();

    let pending = state.reviews.list_pending(50, 0).await.unwrap();
    let pending_ids: Vec<_> = pending.iter().map(|p| p.id).collect();
    assert_eq!(pending_ids, vec![ids[0], ids[2]]);

    let page = state.reviews.list_pending(1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[2]);
}

#[tokio::test]
async fn stats_reflect_decisions() {
    let state = app_state();
    let (reviewer_id, reviewer_name) = reviewer();

    let approved = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Approved Cafe"))
        .await
        .unwrap();
    let rejected = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Rejected Cafe"))
        .await
        .unwrap();
    state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Waiting Cafe"))
        .await
        .unwrap();

    state
        .reviews
        .apply_action(
            approved.id,
            ReviewAction::Approve,
            Some(reviewer_id),
            Some(reviewer_name.clone()),
            None,
            None,
        )
        .await
        .unwrap();
    state
        .reviews
        .apply_action(
            rejected.id,
            ReviewAction::Reject,
            Some(reviewer_id),
            Some(reviewer_name),
            None,
            Some("Incomplete documents".to_string()),
        )
        .await
        .unwrap();

    let stats = state.reviews.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.approved_today, 1);
    assert_eq!(stats.rejected_today, 1);
    assert_eq!(stats.approval_rate, Some(0.5));
    assert!(stats.mean_hours_to_decision.is_some());
}

#[tokio::test]
async fn comments_after_a_decision_do_not_refresh_todays_counts() {
    let state = app_state();
    let (reviewer_id, reviewer_name) = reviewer();
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    state
        .reviews
        .apply_action(
            registration.id,
            ReviewAction::Comment,
            Some(reviewer_id),
            Some(reviewer_name),
            Some("Still waiting on the lease".to_string()),
            None,
        )
        .await
        .unwrap();

    let stats = state.reviews.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.approved_today, 0);
    assert_eq!(stats.rejected_today, 0);
    assert_eq!(stats.mean_hours_to_decision, None);
}

#[tokio::test]
async fn latest_registration_is_the_newest_submission() {
    let state = app_state();
    let user_id = Uuid::new_v4();

    state
        .registrations
        .submit(registration_request(user_id, "First Cafe"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let newest = state
        .registrations
        .submit(registration_request(user_id, "Second Cafe"))
        .await
        .unwrap();

    let latest = state.registrations.latest_for_user(user_id).await.unwrap();
    assert_eq!(latest.id, newest.id);

    let err = state
        .registrations
        .latest_for_user(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test]
async fn purge_keeps_the_business() {
    let state = app_state();
    let business = common::approved_business(&state).await;
    let registration_id = business.business.registration_id.unwrap();

    state.registrations.purge(registration_id).await.unwrap();

    let err = state.registrations.get(registration_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
    let survivor = state.hierarchy.get_business(business.business.id).await.unwrap();
    assert_eq!(survivor.business.registration_id, None);
    assert_eq!(survivor.locations.len(), 1);
}

#[tokio::test]
async fn submit_rejects_missing_documents() {
    let state = app_state();
    let mut request = registration_request(Uuid::new_v4(), "Harbour Grill");
    request.document_urls.clear();

    let err = state.registrations.submit(request).await.unwrap_err();
    match err {
        ServiceError::Validation { field, .. } => assert_eq!(field, "document_urls"),
        other => panic!("unexpected error {other:?}"),
    }
}
