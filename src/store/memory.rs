use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::admins;
use crate::error::{ServiceError, ServiceResult};
use crate::hierarchy::{self, PrimaryChange};
use crate::models::{
    Business, BusinessLocation, BusinessPromotion, BusinessRegistration, BusinessReviewEvent,
    BusinessVerificationStatus, BusinessWithLocations, ClaimReceipt, LocationAdmin,
    NewBusinessLocation, NewBusinessRegistration, NewLocationAdmin, PendingBusinessReview,
    PromotionClaim, RemovedLocation, ReviewCommand, ReviewOutcome, ReviewStats,
    UpdateBusinessRequest, UpdateLocationRequest, UpdatePromotionRequest,
};
use crate::promotions;
use crate::workflow;

use super::Store;

#[derive(Default)]
struct State {
    registrations: HashMap<Uuid, BusinessRegistration>,
    events: Vec<BusinessReviewEvent>,
    businesses: HashMap<Uuid, Business>,
    locations: HashMap<Uuid, BusinessLocation>,
    promotions: HashMap<Uuid, BusinessPromotion>,
    claims: Vec<PromotionClaim>,
    admins: HashMap<(Uuid, Uuid), LocationAdmin>,
}

impl State {
    fn registration(&self, registration_id: Uuid) -> ServiceResult<&BusinessRegistration> {
        self.registrations
            .get(&registration_id)
            .ok_or_else(|| ServiceError::not_found("registration", registration_id))
    }

    fn location(&self, location_id: Uuid) -> ServiceResult<&BusinessLocation> {
        self.locations
            .get(&location_id)
            .ok_or_else(|| ServiceError::not_found("location", location_id))
    }

    fn promotion(&self, promotion_id: Uuid) -> ServiceResult<&BusinessPromotion> {
        self.promotions
            .get(&promotion_id)
            .ok_or_else(|| ServiceError::not_found("promotion", promotion_id))
    }

    fn live_location(&self, location_id: Uuid) -> ServiceResult<&BusinessLocation> {
        let location = self.location(location_id)?;
        if !location.is_active {
            return Err(ServiceError::validation(
                "location_id",
                format!("location {} is inactive", location_id),
            ));
        }
        Ok(location)
    }

    fn locations_of(&self, business_id: Uuid) -> Vec<BusinessLocation> {
        let mut locations: Vec<_> = self
            .locations
            .values()
            .filter(|l| l.business_id == business_id)
            .cloned()
            .collect();
        hierarchy::sort_locations(&mut locations);
        locations
    }

    /// Keeps event timestamps strictly increasing per registration.
    fn next_event_time(&self, registration_id: Uuid, now: DateTime<Utc>) -> DateTime<Utc> {
        let last = self
            .events
            .iter()
            .filter(|e| e.registration_id == registration_id)
            .map(|e| e.created_at)
            .max();
        match last {
            Some(last) if last >= now => last + chrono::Duration::microseconds(1),
            _ => now,
        }
    }

    fn set_primary_flag(&mut self, business_id: Uuid, primary: Option<Uuid>, now: DateTime<Utc>) {
        for location in self
            .locations
            .values_mut()
            .filter(|l| l.business_id == business_id)
        {
            let should_be = Some(location.id) == primary;
            if location.is_primary != should_be {
                location.is_primary = should_be;
                location.updated_at = now;
            }
        }
    }

    /// Drops locations together with everything hanging off them.
    fn cascade_locations(&mut self, location_ids: &HashSet<Uuid>) {
        self.locations.retain(|id, _| !location_ids.contains(id));
        let promotion_ids: HashSet<Uuid> = self
            .promotions
            .values()
            .filter(|p| location_ids.contains(&p.location_id))
            .map(|p| p.id)
            .collect();
        self.promotions.retain(|id, _| !promotion_ids.contains(id));
        self.claims
            .retain(|c| !promotion_ids.contains(&c.promotion_id));
        self.admins
            .retain(|(location_id, _), _| !location_ids.contains(location_id));
    }

    fn commit_review(
        &mut self,
        registration: BusinessRegistration,
        command: &ReviewCommand,
        now: DateTime<Utc>,
        materialized: Option<(Business, BusinessLocation)>,
    ) -> ReviewOutcome {
        let event = workflow::build_event(command, self.next_event_time(registration.id, now));
        self.events.push(event.clone());
        self.registrations
            .insert(registration.id, registration.clone());

        let business = materialized.map(|(business, location)| {
            self.businesses.insert(business.id, business.clone());
            self.locations.insert(location.id, location.clone());
            BusinessWithLocations {
                business,
                locations: vec![location],
            }
        });

        ReviewOutcome {
            registration,
            event,
            business,
        }
    }
}

/// Process-local store. One mutex guards the whole state and no operation
/// awaits while holding it, so every call is atomic and a dropped call
/// leaves nothing behind.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_registration(
        &self,
        registration: NewBusinessRegistration,
    ) -> ServiceResult<BusinessRegistration> {
        let mut state = self.state.lock();
        if state.registrations.contains_key(&registration.id) {
            return Err(ServiceError::conflict("id", "registration already exists"));
        }
        let registration = registration.into_registration();
        state
            .registrations
            .insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn get_registration(
        &self,
        registration_id: Uuid,
    ) -> ServiceResult<Option<BusinessRegistration>> {
        Ok(self.state.lock().registrations.get(&registration_id).cloned())
    }

    async fn list_registrations_for_user(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<Vec<BusinessRegistration>> {
        let state = self.state.lock();
        let mut registrations: Vec<_> = state
            .registrations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        registrations.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(registrations)
    }

    async fn latest_registration_for_user(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<Option<BusinessRegistration>> {
        let state = self.state.lock();
        Ok(state
            .registrations
            .values()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| r.submitted_at)
            .cloned())
    }

    async fn list_pending_reviews(
        &self,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<PendingBusinessReview>> {
        let state = self.state.lock();
        let mut waiting: Vec<_> = state
            .registrations
            .values()
            .filter(|r| {
                matches!(
                    r.status,
                    BusinessVerificationStatus::Pending | BusinessVerificationStatus::UnderReview
                )
            })
            .collect();
        waiting.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(waiting
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(PendingBusinessReview::from)
            .collect())
    }

    async fn list_review_events(
        &self,
        registration_id: Uuid,
    ) -> ServiceResult<Vec<BusinessReviewEvent>> {
        let state = self.state.lock();
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.registration_id == registration_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }

    async fn apply_review_action(&self, command: ReviewCommand) -> ServiceResult<ReviewOutcome> {
        workflow::validate_command(&command)?;
        let mut state = self.state.lock();
        let current = state.registration(command.registration_id)?.clone();
        let next = workflow::next_status(current.status, command.action)?;
        let now = Utc::now();

        let mut updated = current.clone();
        let materialized = if workflow::needs_materialization(&current, next) {
            if state
                .businesses
                .values()
                .any(|b| b.registration_id == Some(current.id))
            {
                return Err(ServiceError::conflict(
                    "registration_id",
                    "a business already exists for this registration",
                ));
            }
            let (business, location) = hierarchy::business_from_registration(&current, now);
            updated.business_id = Some(business.id);
            Some((business, location))
        } else {
            None
        };
        workflow::apply_command(&mut updated, &command, next, now);

        Ok(state.commit_review(updated, &command, now, materialized))
    }

    async fn claim_for_review(
        &self,
        registration_id: Uuid,
        reviewer_id: Uuid,
        reviewer_name: String,
    ) -> ServiceResult<ReviewOutcome> {
        let mut state = self.state.lock();
        let current = state.registration(registration_id)?.clone();
        let next = workflow::claim_status(current.status)?;
        let now = Utc::now();

        let command = workflow::claim_command(registration_id, reviewer_id, reviewer_name);
        let mut updated = current;
        workflow::apply_command(&mut updated, &command, next, now);

        Ok(state.commit_review(updated, &command, now, None))
    }

    async fn review_stats(&self, now: DateTime<Utc>) -> ServiceResult<ReviewStats> {
        let state = self.state.lock();
        let registrations: Vec<_> = state.registrations.values().cloned().collect();
        Ok(workflow::compute_stats(&registrations, &state.events, now))
    }

    async fn purge_registration(&self, registration_id: Uuid) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.registration(registration_id)?;
        state.registrations.remove(&registration_id);
        state
            .events
            .retain(|e| e.registration_id != registration_id);
        for business in state
            .businesses
            .values_mut()
            .filter(|b| b.registration_id == Some(registration_id))
        {
            business.registration_id = None;
            business.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_business(&self, business_id: Uuid) -> ServiceResult<Option<BusinessWithLocations>> {
        let state = self.state.lock();
        Ok(state
            .businesses
            .get(&business_id)
            .map(|business| BusinessWithLocations {
                business: business.clone(),
                locations: state.locations_of(business_id),
            }))
    }

    async fn list_businesses_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Business>> {
        let state = self.state.lock();
        let mut businesses: Vec<_> = state
            .businesses
            .values()
            .filter(|b| b.owner_user_id == user_id)
            .cloned()
            .collect();
        businesses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(businesses)
    }

    async fn update_business(
        &self,
        business_id: Uuid,
        changes: UpdateBusinessRequest,
    ) -> ServiceResult<Business> {
        let mut state = self.state.lock();
        let business = state
            .businesses
            .get_mut(&business_id)
            .ok_or_else(|| ServiceError::not_found("business", business_id))?;
        changes.apply_to_existing(business);
        Ok(business.clone())
    }

    async fn delete_business(&self, business_id: Uuid) -> ServiceResult<()> {
        let mut state = self.state.lock();
        if state.businesses.remove(&business_id).is_none() {
            return Err(ServiceError::not_found("business", business_id));
        }
        let location_ids: HashSet<Uuid> = state
            .locations
            .values()
            .filter(|l| l.business_id == business_id)
            .map(|l| l.id)
            .collect();
        state.cascade_locations(&location_ids);
        Ok(())
    }

    async fn add_location(
        &self,
        location: NewBusinessLocation,
        make_primary: bool,
    ) -> ServiceResult<BusinessLocation> {
        let mut state = self.state.lock();
        if !state.businesses.contains_key(&location.business_id) {
            return Err(ServiceError::not_found("business", location.business_id));
        }
        hierarchy::ensure_place_id_free(
            state.locations.values(),
            location.external_place_id.as_deref(),
            location.id,
        )?;

        let siblings = state.locations_of(location.business_id);
        let is_primary = hierarchy::new_location_is_primary(&siblings, make_primary);
        let now = Utc::now();
        let location = location.into_location(is_primary, now);

        if is_primary {
            state.set_primary_flag(location.business_id, None, now);
        }
        state.locations.insert(location.id, location.clone());
        Ok(location)
    }

    async fn get_location(&self, location_id: Uuid) -> ServiceResult<Option<BusinessLocation>> {
        Ok(self.state.lock().locations.get(&location_id).cloned())
    }

    async fn list_locations_for_business(
        &self,
        business_id: Uuid,
    ) -> ServiceResult<Vec<BusinessLocation>> {
        Ok(self.state.lock().locations_of(business_id))
    }

    async fn update_location(
        &self,
        location_id: Uuid,
        changes: UpdateLocationRequest,
    ) -> ServiceResult<BusinessLocation> {
        let mut state = self.state.lock();
        let target = state.location(location_id)?.clone();
        let siblings = state.locations_of(target.business_id);
        let plan = hierarchy::plan_primary_change(&target, &siblings, &changes)?;
        if changes.external_place_id.is_some() {
            hierarchy::ensure_place_id_free(
                state.locations.values(),
                changes.external_place_id.as_deref(),
                location_id,
            )?;
        }

        let now = Utc::now();
        let mut updated = target.clone();
        changes.apply_attributes(&mut updated);
        updated.is_active = changes.is_active.unwrap_or(target.is_active);
        state.locations.insert(location_id, updated);

        match plan {
            PrimaryChange::Keep => {}
            PrimaryChange::Promote => {
                state.set_primary_flag(target.business_id, Some(location_id), now)
            }
            PrimaryChange::HandOff => {
                let heir = hierarchy::primary_successor(&siblings, location_id).map(|l| l.id);
                state.set_primary_flag(target.business_id, heir, now);
            }
        }

        Ok(state.location(location_id)?.clone())
    }

    async fn set_primary_location(
        &self,
        business_id: Uuid,
        location_id: Uuid,
    ) -> ServiceResult<BusinessLocation> {
        let mut state = self.state.lock();
        let target = state
            .locations
            .get(&location_id)
            .filter(|l| l.business_id == business_id && l.is_active)
            .ok_or_else(|| ServiceError::not_found("location", location_id))?;
        if !target.is_primary {
            state.set_primary_flag(business_id, Some(location_id), Utc::now());
        }
        Ok(state.location(location_id)?.clone())
    }

    async fn remove_location(&self, location_id: Uuid) -> ServiceResult<RemovedLocation> {
        let mut state = self.state.lock();
        let removed = state.location(location_id)?.clone();
        let siblings = state.locations_of(removed.business_id);

        state.cascade_locations(&HashSet::from([location_id]));

        let promoted = if removed.is_primary {
            let heir = hierarchy::primary_successor(&siblings, location_id).map(|l| l.id);
            state.set_primary_flag(removed.business_id, heir, Utc::now());
            heir.and_then(|id| state.locations.get(&id).cloned())
        } else {
            None
        };

        Ok(RemovedLocation { removed, promoted })
    }

    async fn insert_promotion(
        &self,
        promotion: BusinessPromotion,
    ) -> ServiceResult<BusinessPromotion> {
        let mut state = self.state.lock();
        state.live_location(promotion.location_id)?;
        promotions::validate_schedule(promotion.starts_at, promotion.ends_at)?;
        state.promotions.insert(promotion.id, promotion.clone());
        Ok(promotion)
    }

    async fn get_promotion(
        &self,
        promotion_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<BusinessPromotion>> {
        Ok(self
            .state
            .lock()
            .promotions
            .get(&promotion_id)
            .cloned()
            .map(|p| promotions::observe(p, now)))
    }

    async fn list_promotions_for_location(
        &self,
        location_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<BusinessPromotion>> {
        let state = self.state.lock();
        let mut found: Vec<_> = state
            .promotions
            .values()
            .filter(|p| p.location_id == location_id)
            .cloned()
            .map(|p| promotions::observe(p, now))
            .collect();
        found.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(found)
    }

    async fn list_promotions_for_business(
        &self,
        business_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<BusinessPromotion>> {
        let state = self.state.lock();
        let location_ids: HashSet<Uuid> = state
            .locations
            .values()
            .filter(|l| l.business_id == business_id)
            .map(|l| l.id)
            .collect();
        let mut found: Vec<_> = state
            .promotions
            .values()
            .filter(|p| location_ids.contains(&p.location_id))
            .cloned()
            .map(|p| promotions::observe(p, now))
            .collect();
        found.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(found)
    }

    async fn update_promotion(
        &self,
        promotion_id: Uuid,
        changes: UpdatePromotionRequest,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion> {
        let mut state = self.state.lock();
        let mut promotion = state.promotion(promotion_id)?.clone();
        promotions::apply_update(&mut promotion, &changes, actor_id, now)?;
        state.promotions.insert(promotion_id, promotion.clone());
        Ok(promotion)
    }

    async fn publish_promotion(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion> {
        let mut state = self.state.lock();
        let mut promotion = state.promotion(promotion_id)?.clone();
        promotions::publish(&mut promotion, actor_id, now)?;
        state.promotions.insert(promotion_id, promotion.clone());
        Ok(promotion)
    }

    async fn cancel_promotion(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion> {
        let mut state = self.state.lock();
        let mut promotion = state.promotion(promotion_id)?.clone();
        if promotions::cancel(&mut promotion, actor_id, now)? {
            state.promotions.insert(promotion_id, promotion.clone());
        }
        Ok(promotion)
    }

    async fn record_claim(
        &self,
        promotion_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<ClaimReceipt> {
        let mut state = self.state.lock();
        let mut promotion = state.promotion(promotion_id)?.clone();
        let user_claims = state
            .claims
            .iter()
            .filter(|c| c.promotion_id == promotion_id && c.user_id == user_id)
            .count() as i32;

        promotions::check_claim(&promotion, user_claims, now)
            .map_err(|reason| ServiceError::ClaimRejected { reason })?;

        promotion.total_claims += 1;
        promotion.status = promotions::observed_status(&promotion, now);
        promotion.updated_at = now;
        let claim = PromotionClaim {
            id: Uuid::new_v4(),
            promotion_id,
            user_id,
            claimed_at: now,
        };

        state.claims.push(claim.clone());
        state.promotions.insert(promotion_id, promotion.clone());
        Ok(ClaimReceipt { claim, promotion })
    }

    async fn sweep_promotions(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        let mut state = self.state.lock();
        let mut moved = 0;
        for promotion in state.promotions.values_mut() {
            let observed = promotions::observed_status(promotion, now);
            if observed != promotion.status {
                promotion.status = observed;
                promotion.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn upsert_location_admin(&self, grant: NewLocationAdmin) -> ServiceResult<LocationAdmin> {
        let mut state = self.state.lock();
        state.live_location(grant.location_id)?;
        let key = (grant.location_id, grant.user_id);
        let existing = state.admins.get(&key).cloned();
        let admin = admins::merge_grant(existing, grant, Utc::now());
        state.admins.insert(key, admin.clone());
        Ok(admin)
    }

    async fn revoke_location_admin(
        &self,
        location_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<LocationAdmin> {
        let mut state = self.state.lock();
        let admin = state
            .admins
            .get_mut(&(location_id, user_id))
            .ok_or_else(|| ServiceError::not_found("location admin", user_id))?;
        if admin.is_active {
            admin.is_active = false;
            admin.updated_at = Utc::now();
        }
        Ok(admin.clone())
    }

    async fn list_admins_for_location(
        &self,
        location_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>> {
        let state = self.state.lock();
        let mut admins: Vec<_> = state
            .admins
            .values()
            .filter(|a| a.location_id == location_id && (include_revoked || a.is_active))
            .cloned()
            .collect();
        admins.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(admins)
    }

    async fn list_admins_for_user(
        &self,
        user_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>> {
        let state = self.state.lock();
        let mut admins: Vec<_> = state
            .admins
            .values()
            .filter(|a| a.user_id == user_id && (include_revoked || a.is_active))
            .cloned()
            .collect();
        admins.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(admins)
    }
}
