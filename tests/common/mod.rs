#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use business_review_core::models::{
    AddLocationAdminRequest, BusinessPromotionType, BusinessWithLocations,
    CreateBusinessRegistrationRequest, CreateLocationRequest, CreatePromotionRequest,
    LocationAdminRole, ReviewAction,
};
use business_review_core::promotions::Clock;
use business_review_core::state::AppState;
use business_review_core::store::PgStore;

pub const DEADLINE: Duration = Duration::from_secs(5);

pub fn app_state() -> AppState {
    AppState::in_memory(DEADLINE)
}

/// Postgres-backed state when `DATABASE_URL` points at a test database.
pub async fn pg_state() -> Option<AppState> {
    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())?;
    let store = PgStore::connect(&database_url, 16)
        .await
        .expect("connect to DATABASE_URL");
    Some(AppState::new(Arc::new(store), DEADLINE))
}

/// Clock that tests move by hand.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

pub fn registration_request(user_id: Uuid, name: &str) -> CreateBusinessRegistrationRequest {
    CreateBusinessRegistrationRequest {
        user_id,
        name: name.to_string(),
        category: "restaurant".to_string(),
        address: "12 Harbour Street, Valparaiso".to_string(),
        description: Some("Seafood served on the pier since 1998".to_string()),
        phone: Some("+56 32 555 0101".to_string()),
        website: Some("https://example.com".to_string()),
        tax_id: Some("76.123.456-7".to_string()),
        document_urls: vec!["https://docs.example.com/license.pdf".to_string()],
        is_multi_user_team: false,
        owner_email: "owner@example.com".to_string(),
        owner_username: "harbour_owner".to_string(),
    }
}

pub fn reviewer() -> (Uuid, String) {
    (Uuid::new_v4(), "Rita Reviewer".to_string())
}

/// Submits and approves a registration, returning the materialized business.
pub async fn approved_business(state: &AppState) -> BusinessWithLocations {
    let registration = state
        .registrations
        .submit(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .await
        .unwrap();
    let (reviewer_id, reviewer_name) = reviewer();
    let outcome = state
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
    outcome.business.expect("approval materializes a business")
}

pub fn location_request(name: &str, is_primary: bool) -> CreateLocationRequest {
    CreateLocationRequest {
        location_name: name.to_string(),
        formatted_address: format!("{} Avenue 100, Santiago", name),
        street: None,
        city: Some("Santiago".to_string()),
        state_region: None,
        postal_code: None,
        country: Some("CL".to_string()),
        latitude: Some(-33.45),
        longitude: Some(-70.66),
        external_place_id: None,
        timezone: Some("America/Santiago".to_string()),
        phone: None,
        email: None,
        is_primary,
        operating_hours: None,
        notes: None,
        metadata: None,
    }
}

pub fn promotion_request(
    promotion_type: BusinessPromotionType,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> CreatePromotionRequest {
    CreatePromotionRequest {
        title: "Happy hour".to_string(),
        subtitle: None,
        description: None,
        promotion_type,
        image_url: None,
        prize: (promotion_type == BusinessPromotionType::Contest).then(|| "Dinner for two".to_string()),
        reward_points: 50,
        discount_percent: (promotion_type == BusinessPromotionType::Discount).then_some(20),
        max_claims: None,
        per_user_limit: None,
        requires_check_in: false,
        requires_purchase: false,
        terms: None,
        metadata: None,
        starts_at,
        ends_at,
    }
}

pub fn admin_request(user_id: Uuid, role: LocationAdminRole) -> AddLocationAdminRequest {
    AddLocationAdminRequest {
        user_id,
        user_email: "staff@example.com".to_string(),
        user_username: "floor_staff".to_string(),
        role,
    }
}

pub fn primary_count(business: &BusinessWithLocations) -> usize {
    business.locations.iter().filter(|l| l.is_primary).count()
}
