//! Location-scoped promotions, their schedule and claim counters.
//!
//! The stored status is what authors last decided; the observed status also
//! folds in the clock. `observed_status` is the single place that folding
//! happens, used by reads and by the sweep alike.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    BusinessPromotion, BusinessPromotionStatus as Status, BusinessPromotionType, ClaimReceipt,
    ClaimRejection, CreatePromotionRequest, UpdatePromotionRequest,
};
use crate::store::{with_deadline, Store};

const ENTITY: &str = "promotion";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Status of `promotion` as seen at `now`.
pub fn observed_status(promotion: &BusinessPromotion, now: DateTime<Utc>) -> Status {
    match promotion.status {
        Status::Cancelled | Status::Expired => promotion.status,
        _ if now >= promotion.ends_at => Status::Expired,
        Status::Draft => Status::Draft,
        Status::Scheduled | Status::Active => {
            if now >= promotion.starts_at {
                Status::Active
            } else {
                Status::Scheduled
            }
        }
    }
}

/// Returns the promotion with its status folded against `now`.
pub fn observe(mut promotion: BusinessPromotion, now: DateTime<Utc>) -> BusinessPromotion {
    promotion.status = observed_status(&promotion, now);
    promotion
}

pub fn validate_schedule(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> ServiceResult<()> {
    if ends_at <= starts_at {
        return Err(ServiceError::validation(
            "ends_at",
            "end time must be after start time",
        ));
    }
    Ok(())
}

pub fn validate_business_rules(
    promotion_type: BusinessPromotionType,
    discount_percent: Option<i32>,
    prize: Option<&str>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> ServiceResult<()> {
    validate_schedule(starts_at, ends_at)?;

    if let Some(discount) = discount_percent {
        if promotion_type != BusinessPromotionType::Discount {
            return Err(ServiceError::validation(
                "discount_percent",
                "discount percent only applies to discount promotions",
            ));
        }
        if !(0..=100).contains(&discount) {
            return Err(ServiceError::validation(
                "discount_percent",
                "discount must be between 0 and 100",
            ));
        }
    }

    let has_prize = prize.map(|p| !p.trim().is_empty()).unwrap_or(false);
    if promotion_type == BusinessPromotionType::Contest && !has_prize {
        return Err(ServiceError::validation(
            "prize",
            "contest promotions require a prize",
        ));
    }

    Ok(())
}

/// draft → scheduled. The stored status is normalized against `now`.
pub fn publish(
    promotion: &mut BusinessPromotion,
    actor_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let current = observed_status(promotion, now);
    if current != Status::Draft {
        return Err(ServiceError::invalid_transition(ENTITY, current, "publish"));
    }
    promotion.status = Status::Scheduled;
    promotion.status = observed_status(promotion, now);
    promotion.published_at = Some(now);
    promotion.updated_by = actor_id;
    promotion.updated_at = now;
    Ok(())
}

/// Any non-expired state → cancelled. Returns `false` when it already was.
pub fn cancel(
    promotion: &mut BusinessPromotion,
    actor_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> ServiceResult<bool> {
    match observed_status(promotion, now) {
        Status::Cancelled => Ok(false),
        Status::Expired => Err(ServiceError::invalid_transition(ENTITY, Status::Expired, "cancel")),
        Status::Draft | Status::Scheduled | Status::Active => {
            promotion.status = Status::Cancelled;
            promotion.updated_by = actor_id;
            promotion.updated_at = now;
            Ok(true)
        }
    }
}

/// Applies an attribute update, keeping schedule and counters coherent.
pub fn apply_update(
    promotion: &mut BusinessPromotion,
    changes: &UpdatePromotionRequest,
    actor_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let current = observed_status(promotion, now);
    if matches!(current, Status::Cancelled | Status::Expired) {
        return Err(ServiceError::invalid_transition(ENTITY, current, "update"));
    }
    validate_business_rules(
        changes.promotion_type,
        changes.discount_percent,
        changes.prize.as_deref(),
        changes.starts_at,
        changes.ends_at,
    )?;
    if let Some(max_claims) = changes.max_claims {
        if max_claims < promotion.total_claims {
            return Err(ServiceError::validation(
                "max_claims",
                format!(
                    "cannot drop below the {} claims already made",
                    promotion.total_claims
                ),
            ));
        }
    }

    changes.apply_to_existing(promotion, actor_id);
    promotion.status = current;
    promotion.status = observed_status(promotion, now);
    promotion.updated_at = now;
    Ok(())
}

/// Decides whether `user_claims` previous claims by one user allow another.
pub fn check_claim(
    promotion: &BusinessPromotion,
    user_claims: i32,
    now: DateTime<Utc>,
) -> Result<(), ClaimRejection> {
    match observed_status(promotion, now) {
        Status::Active => {}
        Status::Expired => return Err(ClaimRejection::Expired),
        Status::Cancelled => return Err(ClaimRejection::Cancelled),
        Status::Draft | Status::Scheduled => return Err(ClaimRejection::NotActive),
    }
    if let Some(max_claims) = promotion.max_claims {
        if promotion.total_claims >= max_claims {
            return Err(ClaimRejection::Exhausted);
        }
    }
    if let Some(limit) = promotion.per_user_limit {
        if user_claims >= limit {
            return Err(ClaimRejection::PerUserLimit);
        }
    }
    Ok(())
}

/// Authoring, publication and claiming of promotions.
#[derive(Clone)]
pub struct PromotionManager {
    store: Arc<dyn Store>,
    deadline: Duration,
    clock: Clock,
}

impl PromotionManager {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self {
            store,
            deadline,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn create(
        &self,
        location_id: Uuid,
        request: CreatePromotionRequest,
        actor_id: Option<Uuid>,
    ) -> ServiceResult<BusinessPromotion> {
        request.validate()?;
        validate_business_rules(
            request.promotion_type,
            request.discount_percent,
            request.prize.as_deref(),
            request.starts_at,
            request.ends_at,
        )?;

        let mut promotion = request.into_new_promotion(location_id, actor_id);
        let now = self.now();
        promotion.created_at = now;
        promotion.updated_at = now;

        let created = with_deadline(self.deadline, self.store.insert_promotion(promotion)).await?;
        log::info!("Created draft promotion {} on location {}", created.id, location_id);
        Ok(observe(created, now))
    }

    pub async fn get(&self, promotion_id: Uuid) -> ServiceResult<BusinessPromotion> {
        with_deadline(self.deadline, self.store.get_promotion(promotion_id, self.now()))
            .await?
            .ok_or_else(|| ServiceError::not_found(ENTITY, promotion_id))
    }

    pub async fn list_for_location(&self, location_id: Uuid) -> ServiceResult<Vec<BusinessPromotion>> {
        with_deadline(
            self.deadline,
            self.store.list_promotions_for_location(location_id, self.now()),
        )
        .await
    }

    pub async fn list_for_business(&self, business_id: Uuid) -> ServiceResult<Vec<BusinessPromotion>> {
        with_deadline(
            self.deadline,
            self.store.list_promotions_for_business(business_id, self.now()),
        )
        .await
    }

    pub async fn update(
        &self,
        promotion_id: Uuid,
        changes: UpdatePromotionRequest,
        actor_id: Option<Uuid>,
    ) -> ServiceResult<BusinessPromotion> {
        changes.validate()?;
        with_deadline(
            self.deadline,
            self.store
                .update_promotion(promotion_id, changes, actor_id, self.now()),
        )
        .await
    }

    pub async fn publish(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> ServiceResult<BusinessPromotion> {
        let published = with_deadline(
            self.deadline,
            self.store.publish_promotion(promotion_id, actor_id, self.now()),
        )
        .await?;
        log::info!("Published promotion {} ({})", promotion_id, published.status);
        Ok(published)
    }

    pub async fn cancel(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> ServiceResult<BusinessPromotion> {
        let cancelled = with_deadline(
            self.deadline,
            self.store.cancel_promotion(promotion_id, actor_id, self.now()),
        )
        .await?;
        log::info!("Cancelled promotion {}", promotion_id);
        Ok(cancelled)
    }

    pub async fn record_claim(&self, promotion_id: Uuid, user_id: Uuid) -> ServiceResult<ClaimReceipt> {
        match with_deadline(
            self.deadline,
            self.store.record_claim(promotion_id, user_id, self.now()),
        )
        .await
        {
            Ok(receipt) => Ok(receipt),
            Err(ServiceError::ClaimRejected { reason }) => {
                log::warn!(
                    "Claim on promotion {} by user {} rejected: {}",
                    promotion_id,
                    user_id,
                    reason
                );
                Err(ServiceError::ClaimRejected { reason })
            }
            Err(err) => Err(err),
        }
    }

    /// Persists time-driven status moves; safe to run at any time.
    pub async fn sweep(&self) -> ServiceResult<u64> {
        with_deadline(self.deadline, self.store.sweep_promotions(self.now())).await
    }
}
