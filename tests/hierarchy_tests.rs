mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use uuid::Uuid;

use business_review_core::error::ServiceError;
use business_review_core::models::{UpdateBusinessRequest, UpdateLocationRequest};
use business_review_core::state::AppState;

use common::{app_state, approved_business, location_request, primary_count};

async fn pause() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

#[tokio::test]
async fn removing_primary_promotes_oldest_active_location() {
    let state = app_state();
    let business = approved_business(&state).await;
    let business_id = business.business.id;
    let first = business.locations[0].clone();

    pause().await;
    let second = state
        .hierarchy
        .add_location(business_id, location_request("Second", false))
        .await
        .unwrap();
    pause().await;
    let third = state
        .hierarchy
        .add_location(business_id, location_request("Third", false))
        .await
        .unwrap();
    assert!(!second.is_primary && !third.is_primary);

    let removed = state.hierarchy.remove_location(first.id).await.unwrap();
    assert_eq!(removed.removed.id, first.id);
    assert_eq!(removed.promoted.as_ref().map(|l| l.id), Some(second.id));

    let after = state.hierarchy.get_business(business_id).await.unwrap();
    assert_eq!(after.locations.len(), 2);
    assert_eq!(primary_count(&after), 1);
    assert_eq!(after.locations[0].id, second.id);
    assert!(matches!(
        state.hierarchy.get_location(first.id).await,
        Err(ServiceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn removing_last_location_leaves_business_without_primary() {
    let state = app_state();
    let business = approved_business(&state).await;

    let removed = state
        .hierarchy
        .remove_location(business.locations[0].id)
        .await
        .unwrap();
    assert!(removed.promoted.is_none());

    let after = state.hierarchy.get_business(business.business.id).await.unwrap();
    assert!(after.locations.is_empty());

    let readded = state
        .hierarchy
        .add_location(business.business.id, location_request("Reborn", false))
        .await
        .unwrap();
    assert!(readded.is_primary, "first active location becomes primary");
}

#[tokio::test]
async fn adding_primary_location_demotes_previous() {
    let state = app_state();
    let business = approved_business(&state).await;

    let flagship = state
        .hierarchy
        .add_location(business.business.id, location_request("Flagship", true))
        .await
        .unwrap();
    assert!(flagship.is_primary);

    let after = state.hierarchy.get_business(business.business.id).await.unwrap();
    assert_eq!(primary_count(&after), 1);
    assert_eq!(after.locations[0].id, flagship.id);
}

#[tokio::test]
async fn set_primary_moves_the_flag() {
    let state = app_state();
    let business = approved_business(&state).await;
    let branch = state
        .hierarchy
        .add_location(business.business.id, location_request("Branch", false))
        .await
        .unwrap();

    let promoted = state
        .hierarchy
        .set_primary(business.business.id, branch.id)
        .await
        .unwrap();
    assert!(promoted.is_primary);

    let after = state.hierarchy.get_business(business.business.id).await.unwrap();
    assert_eq!(primary_count(&after), 1);
    assert!(after
        .locations
        .iter()
        .any(|l| l.id == business.locations[0].id && !l.is_primary));

    let foreign = approved_business(&state).await;
    let err = state
        .hierarchy
        .set_primary(foreign.business.id, branch.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test]
async fn deactivating_primary_hands_flag_over() {
    let state = app_state();
    let business = approved_business(&state).await;
    let founding = business.locations[0].clone();
    pause().await;
    let branch = state
        .hierarchy
        .add_location(business.business.id, location_request("Branch", false))
        .await
        .unwrap();

    let deactivated = state
        .hierarchy
        .update_location(
            founding.id,
            UpdateLocationRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!deactivated.is_active);
    assert!(!deactivated.is_primary);

    let heir = state.hierarchy.get_location(branch.id).await.unwrap();
    assert!(heir.is_primary);

    let err = state
        .hierarchy
        .update_location(
            branch.id,
            UpdateLocationRequest {
                is_primary: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation { .. }), "got {err:?}");
}

#[tokio::test]
async fn inactive_location_cannot_become_primary() {
    let state = app_state();
    let business = approved_business(&state).await;
    let branch = state
        .hierarchy
        .add_location(business.business.id, location_request("Branch", false))
        .await
        .unwrap();
    state
        .hierarchy
        .update_location(
            branch.id,
            UpdateLocationRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = state
        .hierarchy
        .set_primary(business.business.id, branch.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test]
async fn external_place_id_is_globally_unique() {
    let state = app_state();
    let first = approved_business(&state).await;
    let second = approved_business(&state).await;

    let mut request = location_request("Mapped", false);
    request.external_place_id = Some("place-123".to_string());
    state
        .hierarchy
        .add_location(first.business.id, request.clone())
        .await
        .unwrap();

    let err = state
        .hierarchy
        .add_location(second.business.id, request)
        .await
        .unwrap_err();
    match err {
        ServiceError::Conflict { field, .. } => assert_eq!(field, "external_place_id"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn update_and_delete_business() {
    let state = app_state();
    let business = approved_business(&state).await;

    let updated = state
        .hierarchy
        .update_business(
            business.business.id,
            UpdateBusinessRequest {
                business_name: Some("Harbour Grill & Bar".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.business_name, "Harbour Grill & Bar");
    assert_eq!(updated.category, business.business.category);

    state
        .hierarchy
        .delete_business(business.business.id)
        .await
        .unwrap();
    assert!(matches!(
        state.hierarchy.get_business(business.business.id).await,
        Err(ServiceError::NotFound { .. })
    ));
    assert!(matches!(
        state.hierarchy.get_location(business.locations[0].id).await,
        Err(ServiceError::NotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hierarchy_changes_keep_one_primary() {
    let state = Arc::new(app_state());
    let business = approved_business(&state).await;
    let business_id = business.business.id;

    let mut location_ids = vec![business.locations[0].id];
    for i in 0..5 {
        let location = state
            .hierarchy
            .add_location(business_id, location_request(&format!("Branch {i}"), false))
            .await
            .unwrap();
        location_ids.push(location.id);
    }

    let tasks = location_ids.iter().enumerate().map(|(i, id)| {
        let state: Arc<AppState> = state.clone();
        let id = *id;
        tokio::spawn(async move {
            if i % 2 == 0 {
                state.hierarchy.remove_location(id).await.map(|_| ())
            } else {
                state.hierarchy.set_primary(business_id, id).await.map(|_| ())
            }
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let after = state.hierarchy.get_business(business_id).await.unwrap();
    assert_eq!(after.locations.len(), 3);
    assert_eq!(primary_count(&after), 1);

    let unknown = state.hierarchy.remove_location(Uuid::new_v4()).await;
    assert!(matches!(unknown, Err(ServiceError::NotFound { .. })));
}
