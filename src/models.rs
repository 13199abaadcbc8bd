use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// ENUMS
// ============================================================================

/// Business verification status (this is also a Postgres enum)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "business_verification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BusinessVerificationStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Suspended,
}

impl BusinessVerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Suspended => "suspended",
        }
    }

    /// Only `rejected` closes the audit trail for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}

impl fmt::Display for BusinessVerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review actions applied by reviewers (also a Postgres enum)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "business_review_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestMoreInfo,
    Suspend,
    Resume,
    Comment,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestMoreInfo => "request_more_info",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Comment => "comment",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Promotion category type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "business_promotion_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BusinessPromotionType {
    Discount,
    Contest,
    Event,
    Challenge,
}

/// Promotion lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "business_promotion_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BusinessPromotionStatus {
    Draft,
    Scheduled,
    Active,
    Expired,
    Cancelled,
}

impl BusinessPromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BusinessPromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location admin role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "location_admin_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationAdminRole {
    Owner,
    Manager,
    Staff,
}

impl LocationAdminRole {
    fn rank(&self) -> u8 {
        match self {
            Self::Owner => 3,
            Self::Manager => 2,
            Self::Staff => 1,
        }
    }

    /// True when this role carries at least the capabilities of `required`.
    pub fn at_least(&self, required: LocationAdminRole) -> bool {
        *self >= required
    }
}

impl PartialOrd for LocationAdminRole {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocationAdminRole {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Why a promotion claim was refused
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRejection {
    Expired,
    Exhausted,
    PerUserLimit,
    NotActive,
    Cancelled,
}

impl ClaimRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
            Self::PerUserLimit => "per_user_limit",
            Self::NotActive => "not_active",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ClaimRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// BUSINESS REGISTRATION (Verification Workflow)
// ============================================================================

/// Business registration request persisted in database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BusinessRegistration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub business_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub address: String,
    pub description: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub tax_id: Option<String>,
    pub document_urls: Vec<String>,
    pub is_multi_user_team: bool,
    pub status: BusinessVerificationStatus,
    pub owner_email: String,
    pub owner_username: String,
    pub rejection_reason: Option<String>,
    pub reviewer_notes: Option<String>,
    pub reviewer_id: Option<Uuid>,
    pub reviewer_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Helper struct used when inserting a new registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBusinessRegistration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub category: String,
    pub address: String,
    pub description: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub tax_id: Option<String>,
    pub document_urls: Vec<String>,
    pub is_multi_user_team: bool,
    pub owner_email: String,
    pub owner_username: String,
    pub submitted_at: DateTime<Utc>,
}

impl NewBusinessRegistration {
    pub fn into_registration(self) -> BusinessRegistration {
        BusinessRegistration {
            id: self.id,
            user_id: self.user_id,
            business_id: None,
            name: self.name,
            category: self.category,
            address: self.address,
            description: self.description,
            phone: self.phone,
            website: self.website,
            tax_id: self.tax_id,
            document_urls: self.document_urls,
            is_multi_user_team: self.is_multi_user_team,
            status: BusinessVerificationStatus::Pending,
            owner_email: self.owner_email,
            owner_username: self.owner_username,
            rejection_reason: None,
            reviewer_notes: None,
            reviewer_id: None,
            reviewer_name: None,
            submitted_at: self.submitted_at,
            updated_at: self.submitted_at,
        }
    }
}

/// Historical review event for auditing purposes
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BusinessReviewEvent {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub reviewer_id: Option<Uuid>,
    pub reviewer_name: Option<String>,
    pub action: ReviewAction,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Pending business registration for review dashboards
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingBusinessReview {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub address: String,
    pub tax_id: Option<String>,
    pub document_urls: Vec<String>,
    pub status: BusinessVerificationStatus,
    pub submitted_at: DateTime<Utc>,
    pub owner_email: String,
    pub owner_username: String,
}

impl From<&BusinessRegistration> for PendingBusinessReview {
    fn from(registration: &BusinessRegistration) -> Self {
        Self {
            id: registration.id,
            name: registration.name.clone(),
            category: registration.category.clone(),
            address: registration.address.clone(),
            tax_id: registration.tax_id.clone(),
            document_urls: registration.document_urls.clone(),
            status: registration.status,
            submitted_at: registration.submitted_at,
            owner_email: registration.owner_email.clone(),
            owner_username: registration.owner_username.clone(),
        }
    }
}

/// Aggregated statistics for review dashboards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewStats {
    pub total: i64,
    pub pending: i64,
    pub under_review: i64,
    pub approved: i64,
    pub rejected: i64,
    pub suspended: i64,
    pub approved_today: i64,
    pub rejected_today: i64,
    pub approval_rate: Option<f64>,
    pub mean_hours_to_decision: Option<f64>,
}

/// A single reviewer action, as handed to the store
#[derive(Debug, Clone)]
pub struct ReviewCommand {
    pub registration_id: Uuid,
    pub action: ReviewAction,
    pub reviewer_id: Option<Uuid>,
    pub reviewer_name: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Result of an applied review action
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub registration: BusinessRegistration,
    pub event: BusinessReviewEvent,
    /// Set only when this action materialized the business
    pub business: Option<BusinessWithLocations>,
}

// ============================================================================
// APPROVED BUSINESSES
// ============================================================================

/// Approved business entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Business {
    pub id: Uuid,
    pub registration_id: Option<Uuid>,
    pub owner_user_id: Uuid,
    pub business_name: String,
    pub category: String,
    pub tax_id: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub is_active: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable business attributes; `None` keeps the current value
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBusinessRequest {
    #[validate(length(min = 3, max = 120))]
    pub business_name: Option<String>,
    #[validate(length(min = 3, max = 120))]
    pub category: Option<String>,
    pub tax_id: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub is_active: Option<bool>,
    pub metadata: Option<Value>,
}

impl UpdateBusinessRequest {
    pub fn apply_to_existing(&self, existing: &mut Business) {
        if let Some(name) = &self.business_name {
            existing.business_name = name.clone();
        }
        if let Some(category) = &self.category {
            existing.category = category.clone();
        }
        if self.tax_id.is_some() {
            existing.tax_id = self.tax_id.clone();
        }
        if self.description.is_some() {
            existing.description = self.description.clone();
        }
        if self.website.is_some() {
            existing.website = self.website.clone();
        }
        if self.logo_url.is_some() {
            existing.logo_url = self.logo_url.clone();
        }
        if let Some(active) = self.is_active {
            existing.is_active = active;
        }
        if let Some(metadata) = &self.metadata {
            existing.metadata = metadata.clone();
        }
        existing.updated_at = Utc::now();
    }
}

// ============================================================================
// BUSINESS LOCATIONS (Branches/Physical Locations)
// ============================================================================

/// Business location/branch
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BusinessLocation {
    pub id: Uuid,
    pub business_id: Uuid,
    pub location_name: String,
    pub formatted_address: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state_region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub external_place_id: Option<String>,
    pub timezone: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub is_primary: bool,
    pub operating_hours: Option<Value>,
    pub notes: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Helper for creating new location. `is_primary` is decided by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBusinessLocation {
    pub id: Uuid,
    pub business_id: Uuid,
    pub location_name: String,
    pub formatted_address: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state_region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub external_place_id: Option<String>,
    pub timezone: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub operating_hours: Option<Value>,
    pub notes: Option<String>,
    pub metadata: Value,
}

impl NewBusinessLocation {
    pub fn into_location(self, is_primary: bool, created_at: DateTime<Utc>) -> BusinessLocation {
        BusinessLocation {
            id: self.id,
            business_id: self.business_id,
            location_name: self.location_name,
            formatted_address: self.formatted_address,
            street: self.street,
            city: self.city,
            state_region: self.state_region,
            postal_code: self.postal_code,
            country: self.country,
            latitude: self.latitude,
            longitude: self.longitude,
            external_place_id: self.external_place_id,
            timezone: self.timezone,
            phone: self.phone,
            email: self.email,
            is_active: true,
            is_primary,
            operating_hours: self.operating_hours,
            notes: self.notes,
            metadata: self.metadata,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Outcome of removing a location
#[derive(Debug, Clone, Serialize)]
pub struct RemovedLocation {
    pub removed: BusinessLocation,
    /// Location that inherited the primary flag, if any
    pub promoted: Option<BusinessLocation>,
}

// ============================================================================
// BUSINESS PROMOTIONS (Per Location)
// ============================================================================

/// Promotion for a specific location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BusinessPromotion {
    pub id: Uuid,
    pub location_id: Uuid,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub promotion_type: BusinessPromotionType,
    pub status: BusinessPromotionStatus,
    pub image_url: Option<String>,
    pub prize: Option<String>,
    pub reward_points: i32,
    pub discount_percent: Option<i32>,
    pub max_claims: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub total_claims: i32,
    pub requires_check_in: bool,
    pub requires_purchase: bool,
    pub terms: Option<String>,
    pub metadata: Value,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record of one user claiming one promotion
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PromotionClaim {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub user_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

/// Accepted claim together with the promotion counters after it
#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
    pub claim: PromotionClaim,
    pub promotion: BusinessPromotion,
}

// ============================================================================
// LOCATION ADMINISTRATORS
// ============================================================================

/// Administrator for a specific location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocationAdmin {
    pub id: Uuid,
    pub location_id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub user_username: String,
    pub role: LocationAdminRole,
    pub granted_by: Option<Uuid>,
    pub granted_by_username: Option<String>,
    pub is_active: bool,
    pub granted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Helper for granting a role; the store upserts on (location, user)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLocationAdmin {
    pub id: Uuid,
    pub location_id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub user_username: String,
    pub role: LocationAdminRole,
    pub granted_by: Option<Uuid>,
    pub granted_by_username: Option<String>,
    pub granted_at: DateTime<Utc>,
}

// ============================================================================
// REQUEST/RESPONSE DTOs
// ============================================================================

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// Payload sent by business owners to create a registration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBusinessRegistrationRequest {
    pub user_id: Uuid,
    #[validate(length(min = 3, max = 120))]
    pub name: String,
    #[validate(length(min = 3, max = 120))]
    pub category: String,
    #[validate(length(min = 5))]
    pub address: String,
    #[validate(length(min = 10, max = 2000))]
    pub description: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    #[validate(length(min = 4, max = 64))]
    pub tax_id: Option<String>,
    #[validate(length(min = 1))]
    pub document_urls: Vec<String>,
    #[serde(default)]
    pub is_multi_user_team: bool,
    #[validate(email)]
    pub owner_email: String,
    #[validate(length(min = 3, max = 60))]
    pub owner_username: String,
}

impl CreateBusinessRegistrationRequest {
    pub fn into_new_registration(self) -> NewBusinessRegistration {
        NewBusinessRegistration {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            name: self.name,
            category: self.category,
            address: self.address,
            description: self.description,
            phone: self.phone,
            website: self.website,
            tax_id: self.tax_id,
            document_urls: self.document_urls,
            is_multi_user_team: self.is_multi_user_team,
            owner_email: self.owner_email,
            owner_username: self.owner_username,
            submitted_at: Utc::now(),
        }
    }
}

/// Review action request sent by reviewers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewActionRequest {
    pub action: ReviewAction,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Request to create a location
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateLocationRequest {
    #[validate(length(min = 2, max = 120))]
    pub location_name: String,
    #[validate(length(min = 5))]
    pub formatted_address: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state_region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[validate(length(min = 1, max = 255))]
    pub external_place_id: Option<String>,
    pub timezone: Option<String>,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    pub operating_hours: Option<Value>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

impl CreateLocationRequest {
    pub fn into_new_location(self, business_id: Uuid) -> NewBusinessLocation {
        NewBusinessLocation {
            id: Uuid::new_v4(),
            business_id,
            location_name: self.location_name,
            formatted_address: self.formatted_address,
            street: self.street,
            city: self.city,
            state_region: self.state_region,
            postal_code: self.postal_code,
            country: self.country,
            latitude: self.latitude,
            longitude: self.longitude,
            external_place_id: self.external_place_id,
            timezone: self.timezone,
            phone: self.phone,
            email: self.email,
            operating_hours: self.operating_hours,
            notes: self.notes,
            metadata: self.metadata.unwrap_or(Value::Object(Default::default())),
        }
    }
}

/// Request to update a location; `None` keeps the current value.
///
/// `is_active` and `is_primary` are not copied blindly: the store routes them
/// through the primary-location rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateLocationRequest {
    #[validate(length(min = 2, max = 120))]
    pub location_name: Option<String>,
    #[validate(length(min = 5))]
    pub formatted_address: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state_region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[validate(length(min = 1, max = 255))]
    pub external_place_id: Option<String>,
    pub timezone: Option<String>,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub is_primary: Option<bool>,
    pub is_active: Option<bool>,
    pub operating_hours: Option<Value>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

impl UpdateLocationRequest {
    /// Copies plain attributes. Flags are handled by the caller.
    pub fn apply_attributes(&self, existing: &mut BusinessLocation) {
        if let Some(name) = &self.location_name {
            existing.location_name = name.clone();
        }
        if let Some(address) = &self.formatted_address {
            existing.formatted_address = address.clone();
        }
        if self.street.is_some() {
            existing.street = self.street.clone();
        }
        if self.city.is_some() {
            existing.city = self.city.clone();
        }
        if self.state_region.is_some() {
            existing.state_region = self.state_region.clone();
        }
        if self.postal_code.is_some() {
            existing.postal_code = self.postal_code.clone();
        }
        if self.country.is_some() {
            existing.country = self.country.clone();
        }
        if self.latitude.is_some() {
            existing.latitude = self.latitude;
        }
        if self.longitude.is_some() {
            existing.longitude = self.longitude;
        }
        if self.external_place_id.is_some() {
            existing.external_place_id = self.external_place_id.clone();
        }
        if self.timezone.is_some() {
            existing.timezone = self.timezone.clone();
        }
        if self.phone.is_some() {
            existing.phone = self.phone.clone();
        }
        if self.email.is_some() {
            existing.email = self.email.clone();
        }
        if self.operating_hours.is_some() {
            existing.operating_hours = self.operating_hours.clone();
        }
        if self.notes.is_some() {
            existing.notes = self.notes.clone();
        }
        if let Some(metadata) = &self.metadata {
            existing.metadata = metadata.clone();
        }
        existing.updated_at = Utc::now();
    }
}

/// Request to create a promotion
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePromotionRequest {
    #[validate(length(min = 3, max = 120))]
    pub title: String,
    #[validate(length(max = 160))]
    pub subtitle: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    pub promotion_type: BusinessPromotionType,
    #[validate(length(max = 1024))]
    pub image_url: Option<String>,
    #[validate(length(max = 1024))]
    pub prize: Option<String>,
    #[validate(range(min = 0, max = 10000))]
    #[serde(default)]
    pub reward_points: i32,
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: Option<i32>,
    #[validate(range(min = 1, max = 1000000))]
    pub max_claims: Option<i32>,
    #[validate(range(min = 1, max = 10000))]
    pub per_user_limit: Option<i32>,
    #[serde(default)]
    pub requires_check_in: bool,
    #[serde(default)]
    pub requires_purchase: bool,
    #[validate(length(max = 4000))]
    pub terms: Option<String>,
    pub metadata: Option<Value>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl CreatePromotionRequest {
    pub fn into_new_promotion(self, location_id: Uuid, actor_id: Option<Uuid>) -> BusinessPromotion {
        let now = Utc::now();
        BusinessPromotion {
            id: Uuid::new_v4(),
            location_id,
            title: self.title,
            subtitle: self.subtitle,
            description: self.description,
            promotion_type: self.promotion_type,
            status: BusinessPromotionStatus::Draft,
            image_url: self.image_url,
            prize: self.prize,
            reward_points: self.reward_points,
            discount_percent: self.discount_percent,
            max_claims: self.max_claims,
            per_user_limit: self.per_user_limit,
            total_claims: 0,
            requires_check_in: self.requires_check_in,
            requires_purchase: self.requires_purchase,
            terms: self.terms,
            metadata: self.metadata.unwrap_or(Value::Object(Default::default())),
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            published_at: None,
            created_by: actor_id,
            updated_by: actor_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request to update a promotion. Status moves only through publish/cancel.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdatePromotionRequest {
    #[validate(length(min = 3, max = 120))]
    pub title: String,
    #[validate(length(max = 160))]
    pub subtitle: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    pub promotion_type: BusinessPromotionType,
    #[validate(length(max = 1024))]
    pub image_url: Option<String>,
    #[validate(length(max = 1024))]
    pub prize: Option<String>,
    #[validate(range(min = 0, max = 10000))]
    #[serde(default)]
    pub reward_points: i32,
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: Option<i32>,
    #[validate(range(min = 1, max = 1000000))]
    pub max_claims: Option<i32>,
    #[validate(range(min = 1, max = 10000))]
    pub per_user_limit: Option<i32>,
    #[serde(default)]
    pub requires_check_in: bool,
    #[serde(default)]
    pub requires_purchase: bool,
    #[validate(length(max = 4000))]
    pub terms: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

impl UpdatePromotionRequest {
    pub fn apply_to_existing(&self, existing: &mut BusinessPromotion, actor_id: Option<Uuid>) {
        existing.title = self.title.clone();
        existing.subtitle = self.subtitle.clone();
        existing.description = self.description.clone();
        existing.promotion_type = self.promotion_type;
        existing.image_url = self.image_url.clone();
        existing.prize = self.prize.clone();
        existing.reward_points = self.reward_points;
        existing.discount_percent = self.discount_percent;
        existing.max_claims = self.max_claims;
        existing.per_user_limit = self.per_user_limit;
        existing.requires_check_in = self.requires_check_in;
        existing.requires_purchase = self.requires_purchase;
        existing.terms = self.terms.clone();
        existing.starts_at = self.starts_at;
        existing.ends_at = self.ends_at;
        if let Some(metadata) = &self.metadata {
            existing.metadata = metadata.clone();
        }
        existing.updated_by = actor_id;
        existing.updated_at = Utc::now();
    }
}

/// Request to add location admin
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddLocationAdminRequest {
    pub user_id: Uuid,
    #[validate(email)]
    pub user_email: String,
    #[validate(length(min = 3, max = 60))]
    pub user_username: String,
    pub role: LocationAdminRole,
}

impl AddLocationAdminRequest {
    pub fn into_new_admin(
        self,
        location_id: Uuid,
        granted_by: Option<Uuid>,
        granted_by_username: Option<String>,
    ) -> NewLocationAdmin {
        NewLocationAdmin {
            id: Uuid::new_v4(),
            location_id,
            user_id: self.user_id,
            user_email: self.user_email,
            user_username: self.user_username,
            role: self.role,
            granted_by,
            granted_by_username,
            granted_at: Utc::now(),
        }
    }
}

// ============================================================================
// COMPOSITE RESPONSE TYPES
// ============================================================================

/// Business with its locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessWithLocations {
    pub business: Business,
    pub locations: Vec<BusinessLocation>,
}

/// Business registration with review history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationWithHistory {
    pub registration: BusinessRegistration,
    pub history: Vec<BusinessReviewEvent>,
}
