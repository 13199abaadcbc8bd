//! Business hierarchy: businesses, their locations and the primary flag.
//!
//! A business with at least one active location has exactly one primary
//! location, and only active locations may be primary. The helpers here
//! decide *which* location holds the flag; the store applies the decision
//! inside the same transaction that changed the location set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Business, BusinessLocation, BusinessRegistration, BusinessWithLocations,
    CreateLocationRequest, NewBusinessLocation, RemovedLocation, UpdateBusinessRequest,
    UpdateLocationRequest,
};
use crate::store::{with_deadline, Store};

/// Business plus its initial primary location for an approved registration.
pub fn business_from_registration(
    registration: &BusinessRegistration,
    now: DateTime<Utc>,
) -> (Business, BusinessLocation) {
    let business = Business {
        id: Uuid::new_v4(),
        registration_id: Some(registration.id),
        owner_user_id: registration.user_id,
        business_name: registration.name.clone(),
        category: registration.category.clone(),
        tax_id: registration.tax_id.clone(),
        description: registration.description.clone(),
        website: registration.website.clone(),
        logo_url: None,
        is_active: true,
        metadata: Value::Object(Default::default()),
        created_at: now,
        updated_at: now,
    };

    let location = NewBusinessLocation {
        id: Uuid::new_v4(),
        business_id: business.id,
        location_name: registration.name.clone(),
        formatted_address: registration.address.clone(),
        street: None,
        city: None,
        state_region: None,
        postal_code: None,
        country: None,
        latitude: None,
        longitude: None,
        external_place_id: None,
        timezone: None,
        phone: registration.phone.clone(),
        email: Some(registration.owner_email.clone()),
        operating_hours: None,
        notes: None,
        metadata: Value::Object(Default::default()),
    }
    .into_location(true, now);

    (business, location)
}

/// Whether a newly added location ends up primary.
///
/// A business without an active location always takes the newcomer as its
/// primary, whatever was requested.
pub fn new_location_is_primary(siblings: &[BusinessLocation], requested: bool) -> bool {
    requested || !siblings.iter().any(|l| l.is_active)
}

/// Oldest active location other than `excluded`, the heir of the primary flag.
pub fn primary_successor(locations: &[BusinessLocation], excluded: Uuid) -> Option<&BusinessLocation> {
    locations
        .iter()
        .filter(|l| l.id != excluded && l.is_active)
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Verifies the primary-location invariant over one business's locations.
pub fn check_primary_invariant(locations: &[BusinessLocation]) -> Result<(), String> {
    let primaries: Vec<_> = locations.iter().filter(|l| l.is_primary).collect();
    let active = locations.iter().filter(|l| l.is_active).count();

    if primaries.iter().any(|l| !l.is_active) {
        return Err("an inactive location is marked primary".into());
    }
    match (active, primaries.len()) {
        (0, 0) => Ok(()),
        (_, 1) => Ok(()),
        (_, n) => Err(format!("{} active location(s) but {} primaries", active, n)),
    }
}

/// Orders a business's locations the way they are listed: primary first,
/// then oldest first.
pub fn sort_locations(locations: &mut [BusinessLocation]) {
    locations.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// How an update request affects the primary flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryChange {
    /// Flag untouched.
    Keep,
    /// Target becomes primary; others are cleared first.
    Promote,
    /// Target loses the flag; the heir takes it.
    HandOff,
}

/// Decides the primary consequence of an update on `target`, given the
/// business's other locations. Fails when the primary would be demoted
/// without an heir while it stays active.
pub fn plan_primary_change(
    target: &BusinessLocation,
    siblings: &[BusinessLocation],
    changes: &UpdateLocationRequest,
) -> ServiceResult<PrimaryChange> {
    let will_be_active = changes.is_active.unwrap_or(target.is_active);
    let has_heir = primary_successor(siblings, target.id).is_some();

    if !will_be_active {
        if changes.is_primary == Some(true) {
            return Err(ServiceError::validation(
                "is_primary",
                "an inactive location cannot be primary",
            ));
        }
        return Ok(if target.is_primary {
            PrimaryChange::HandOff
        } else {
            PrimaryChange::Keep
        });
    }

    match changes.is_primary {
        Some(true) if !target.is_primary => Ok(PrimaryChange::Promote),
        Some(false) if target.is_primary => {
            if has_heir {
                Ok(PrimaryChange::HandOff)
            } else {
                Err(ServiceError::validation(
                    "is_primary",
                    "the only active location must remain primary",
                ))
            }
        }
        _ => {
            // Re-activation of a location whose business lost its primary.
            let business_has_primary = siblings.iter().any(|l| l.id != target.id && l.is_primary);
            if !target.is_primary && !business_has_primary {
                Ok(PrimaryChange::Promote)
            } else {
                Ok(PrimaryChange::Keep)
            }
        }
    }
}

/// Rejects an external place id already used by another location.
pub fn ensure_place_id_free<'a>(
    mut all_locations: impl Iterator<Item = &'a BusinessLocation>,
    place_id: Option<&str>,
    owner: Uuid,
) -> ServiceResult<()> {
    let Some(place_id) = place_id else {
        return Ok(());
    };
    if all_locations.any(|l| l.id != owner && l.external_place_id.as_deref() == Some(place_id)) {
        return Err(ServiceError::conflict(
            "external_place_id",
            format!("place {} is already registered to another location", place_id),
        ));
    }
    Ok(())
}

/// Owns businesses and their locations.
#[derive(Clone)]
pub struct BusinessHierarchy {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl BusinessHierarchy {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub async fn get_business(&self, business_id: Uuid) -> ServiceResult<BusinessWithLocations> {
        with_deadline(self.deadline, self.store.get_business(business_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("business", business_id))
    }

    pub async fn list_businesses_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Business>> {
        with_deadline(self.deadline, self.store.list_businesses_for_user(user_id)).await
    }

    pub async fn update_business(
        &self,
        business_id: Uuid,
        changes: UpdateBusinessRequest,
    ) -> ServiceResult<Business> {
        validator::Validate::validate(&changes)?;
        with_deadline(self.deadline, self.store.update_business(business_id, changes)).await
    }

    pub async fn delete_business(&self, business_id: Uuid) -> ServiceResult<()> {
        with_deadline(self.deadline, self.store.delete_business(business_id)).await?;
        log::info!("Deleted business {} with all its locations", business_id);
        Ok(())
    }

    pub async fn add_location(
        &self,
        business_id: Uuid,
        request: CreateLocationRequest,
    ) -> ServiceResult<BusinessLocation> {
        validator::Validate::validate(&request)?;
        let make_primary = request.is_primary;
        let location = request.into_new_location(business_id);
        let created =
            with_deadline(self.deadline, self.store.add_location(location, make_primary)).await?;
        log::info!(
            "Added location {} to business {} (primary: {})",
            created.id,
            business_id,
            created.is_primary
        );
        Ok(created)
    }

    pub async fn get_location(&self, location_id: Uuid) -> ServiceResult<BusinessLocation> {
        with_deadline(self.deadline, self.store.get_location(location_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("location", location_id))
    }

    pub async fn list_locations(&self, business_id: Uuid) -> ServiceResult<Vec<BusinessLocation>> {
        with_deadline(self.deadline, self.store.list_locations_for_business(business_id)).await
    }

    pub async fn update_location(
        &self,
        location_id: Uuid,
        changes: UpdateLocationRequest,
    ) -> ServiceResult<BusinessLocation> {
        validator::Validate::validate(&changes)?;
        with_deadline(self.deadline, self.store.update_location(location_id, changes)).await
    }

    pub async fn set_primary(
        &self,
        business_id: Uuid,
        location_id: Uuid,
    ) -> ServiceResult<BusinessLocation> {
        let location = with_deadline(
            self.deadline,
            self.store.set_primary_location(business_id, location_id),
        )
        .await?;
        log::info!("Location {} is now primary for business {}", location_id, business_id);
        Ok(location)
    }

    pub async fn remove_location(&self, location_id: Uuid) -> ServiceResult<RemovedLocation> {
        let removed = with_deadline(self.deadline, self.store.remove_location(location_id)).await?;
        match &removed.promoted {
            Some(heir) => log::info!(
                "Removed primary location {}; {} inherited the primary flag",
                location_id,
                heir.id
            ),
            None => log::info!("Removed location {}", location_id),
        }
        Ok(removed)
    }
}
