//! Persistence seam.
//!
//! Every `Store` method is one atomic unit: it either commits all of its
//! writes or none of them. Invariant maintenance (primary location hand-off,
//! claim counting, business materialization) happens inside these methods so
//! concurrent callers only ever observe the state before or after a call.

mod memory;
mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Business, BusinessLocation, BusinessPromotion, BusinessRegistration, BusinessReviewEvent,
    BusinessWithLocations, ClaimReceipt, LocationAdmin, NewBusinessLocation,
    NewBusinessRegistration, NewLocationAdmin, PendingBusinessReview, RemovedLocation,
    ReviewCommand, ReviewOutcome, ReviewStats, UpdateBusinessRequest, UpdateLocationRequest,
    UpdatePromotionRequest,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // --- registrations & review workflow ---

    async fn insert_registration(
        &self,
        registration: NewBusinessRegistration,
    ) -> ServiceResult<BusinessRegistration>;

    async fn get_registration(&self, registration_id: Uuid)
        -> ServiceResult<Option<BusinessRegistration>>;

    /// Newest first.
    async fn list_registrations_for_user(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<Vec<BusinessRegistration>>;

    async fn latest_registration_for_user(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<Option<BusinessRegistration>>;

    /// Pending and under-review registrations, oldest submission first.
    async fn list_pending_reviews(
        &self,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<PendingBusinessReview>>;

    /// Oldest event first.
    async fn list_review_events(
        &self,
        registration_id: Uuid,
    ) -> ServiceResult<Vec<BusinessReviewEvent>>;

    /// Validates the transition, appends the audit event, updates the
    /// registration and materializes the business on first approval.
    async fn apply_review_action(&self, command: ReviewCommand) -> ServiceResult<ReviewOutcome>;

    /// Moves a pending registration to `under_review`.
    async fn claim_for_review(
        &self,
        registration_id: Uuid,
        reviewer_id: Uuid,
        reviewer_name: String,
    ) -> ServiceResult<ReviewOutcome>;

    async fn review_stats(&self, now: DateTime<Utc>) -> ServiceResult<ReviewStats>;

    /// Deletes the registration and its events, detaching any business.
    async fn purge_registration(&self, registration_id: Uuid) -> ServiceResult<()>;

    // --- business hierarchy ---

    async fn get_business(&self, business_id: Uuid) -> ServiceResult<Option<BusinessWithLocations>>;

    async fn list_businesses_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Business>>;

    async fn update_business(
        &self,
        business_id: Uuid,
        changes: UpdateBusinessRequest,
    ) -> ServiceResult<Business>;

    /// Cascades to locations, promotions, claims and admin grants.
    async fn delete_business(&self, business_id: Uuid) -> ServiceResult<()>;

    async fn add_location(
        &self,
        location: NewBusinessLocation,
        make_primary: bool,
    ) -> ServiceResult<BusinessLocation>;

    async fn get_location(&self, location_id: Uuid) -> ServiceResult<Option<BusinessLocation>>;

    /// Primary first, then by creation time.
    async fn list_locations_for_business(
        &self,
        business_id: Uuid,
    ) -> ServiceResult<Vec<BusinessLocation>>;

    async fn update_location(
        &self,
        location_id: Uuid,
        changes: UpdateLocationRequest,
    ) -> ServiceResult<BusinessLocation>;

    async fn set_primary_location(
        &self,
        business_id: Uuid,
        location_id: Uuid,
    ) -> ServiceResult<BusinessLocation>;

    async fn remove_location(&self, location_id: Uuid) -> ServiceResult<RemovedLocation>;

    // --- promotions ---

    /// Fails unless the location exists and is active.
    async fn insert_promotion(&self, promotion: BusinessPromotion)
        -> ServiceResult<BusinessPromotion>;

    async fn get_promotion(
        &self,
        promotion_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<BusinessPromotion>>;

    async fn list_promotions_for_location(
        &self,
        location_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<BusinessPromotion>>;

    async fn list_promotions_for_business(
        &self,
        business_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<BusinessPromotion>>;

    async fn update_promotion(
        &self,
        promotion_id: Uuid,
        changes: UpdatePromotionRequest,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion>;

    async fn publish_promotion(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion>;

    async fn cancel_promotion(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion>;

    async fn record_claim(
        &self,
        promotion_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<ClaimReceipt>;

    /// Persists the time-derived status of every promotion. Returns how many
    /// rows moved.
    async fn sweep_promotions(&self, now: DateTime<Utc>) -> ServiceResult<u64>;

    // --- location admins ---

    async fn upsert_location_admin(&self, grant: NewLocationAdmin) -> ServiceResult<LocationAdmin>;

    async fn revoke_location_admin(
        &self,
        location_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<LocationAdmin>;

    async fn list_admins_for_location(
        &self,
        location_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>>;

    async fn list_admins_for_user(
        &self,
        user_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>>;
}

/// Runs a store call under the caller's deadline. A timed-out call is
/// dropped, which rolls back any open transaction.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("Store operation exceeded deadline of {:?}", deadline);
            Err(ServiceError::Timeout)
        }
    }
}
