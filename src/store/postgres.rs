use std::{borrow::Cow, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Connection, Executor, PgConnection, PgPool, Row,
};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::hierarchy::{self, PrimaryChange};
use crate::models::{
    Business, BusinessLocation, BusinessPromotion, BusinessRegistration, BusinessReviewEvent,
    BusinessWithLocations, ClaimReceipt, LocationAdmin, NewBusinessLocation,
    NewBusinessRegistration, NewLocationAdmin, PendingBusinessReview, PromotionClaim,
    RemovedLocation, ReviewCommand, ReviewOutcome, ReviewStats, UpdateBusinessRequest,
    UpdateLocationRequest, UpdatePromotionRequest,
};
use crate::promotions;
use crate::workflow;

use super::Store;

macro_rules! registration_columns {
    () => {
        "id, user_id, business_id, name, category, address, description, phone, website, \
         tax_id, document_urls, is_multi_user_team, status, owner_email, owner_username, \
         rejection_reason, reviewer_notes, reviewer_id, reviewer_name, submitted_at, updated_at"
    };
}

macro_rules! event_columns {
    () => {
        "id, registration_id, reviewer_id, reviewer_name, action, notes, rejection_reason, created_at"
    };
}

macro_rules! business_columns {
    () => {
        "id, registration_id, owner_user_id, business_name, category, tax_id, description, \
         website, logo_url, is_active, metadata, created_at, updated_at"
    };
}

macro_rules! location_columns {
    () => {
        "id, business_id, location_name, formatted_address, street, city, state_region, \
         postal_code, country, latitude, longitude, external_place_id, timezone, phone, email, \
         is_active, is_primary, operating_hours, notes, metadata, created_at, updated_at"
    };
}

macro_rules! promotion_columns {
    () => {
        "id, location_id, title, subtitle, description, promotion_type, status, image_url, \
         prize, reward_points, discount_percent, max_claims, per_user_limit, total_claims, \
         requires_check_in, requires_purchase, terms, metadata, starts_at, ends_at, \
         published_at, created_by, updated_by, created_at, updated_at"
    };
}

macro_rules! admin_columns {
    () => {
        "id, location_id, user_id, user_email, user_username, role, granted_by, \
         granted_by_username, is_active, granted_at, created_at, updated_at"
    };
}

/// Postgres-backed store. Row locks serialize the operations that maintain
/// cross-row invariants: the registration row for review actions, the
/// business row for anything touching the primary flag, the promotion row
/// for claims.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> ServiceResult<Self> {
        let options = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(600)))
            .test_before_acquire(true);

        let pool = match options.clone().connect(database_url).await {
            Ok(pool) => pool,
            Err(sqlx::Error::Database(db_err)) if db_err.code() == Some(Cow::Borrowed("3D000")) => {
                log::info!("Database missing, attempting to create it");
                create_database_if_missing(database_url).await?;
                options.connect(database_url).await?
            }
            Err(err) => return Err(err.into()),
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("Database connection established and migrations applied");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// ROW HELPERS (run inside the caller's transaction)
// ============================================================================

async fn lock_registration(
    conn: &mut PgConnection,
    registration_id: Uuid,
) -> ServiceResult<BusinessRegistration> {
    sqlx::query_as::<_, BusinessRegistration>(concat!(
        "SELECT ",
        registration_columns!(),
        " FROM business_registration_requests WHERE id = $1 FOR UPDATE"
    ))
    .bind(registration_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ServiceError::not_found("registration", registration_id))
}

async fn write_registration(
    conn: &mut PgConnection,
    registration: &BusinessRegistration,
) -> ServiceResult<BusinessRegistration> {
    let record = sqlx::query_as::<_, BusinessRegistration>(concat!(
        r#"
        UPDATE business_registration_requests
        SET
            business_id = $2,
            status = $3,
            rejection_reason = $4,
            reviewer_notes = $5,
            reviewer_id = $6,
            reviewer_name = $7,
            updated_at = $8
        WHERE id = $1
        RETURNING "#,
        registration_columns!()
    ))
    .bind(registration.id)
    .bind(registration.business_id)
    .bind(registration.status)
    .bind(registration.rejection_reason.as_deref())
    .bind(registration.reviewer_notes.as_deref())
    .bind(registration.reviewer_id)
    .bind(registration.reviewer_name.as_deref())
    .bind(registration.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(record)
}

/// Appends an audit event. Timestamps are strictly increasing per
/// registration even when the clock does not advance between two actions.
async fn insert_event(
    conn: &mut PgConnection,
    command: &ReviewCommand,
) -> ServiceResult<BusinessReviewEvent> {
    let event = workflow::build_event(command, Utc::now());
    let record = sqlx::query_as::<_, BusinessReviewEvent>(concat!(
        r#"
        INSERT INTO business_review_events (
            id, registration_id, reviewer_id, reviewer_name, action, notes, rejection_reason,
            created_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            GREATEST(
                clock_timestamp(),
                COALESCE(
                    (SELECT MAX(created_at) + INTERVAL '1 microsecond'
                     FROM business_review_events WHERE registration_id = $2),
                    clock_timestamp()
                )
            )
        )
        RETURNING "#,
        event_columns!()
    ))
    .bind(event.id)
    .bind(event.registration_id)
    .bind(event.reviewer_id)
    .bind(event.reviewer_name.as_deref())
    .bind(event.action)
    .bind(event.notes.as_deref())
    .bind(event.rejection_reason.as_deref())
    .fetch_one(conn)
    .await?;

    Ok(record)
}

async fn insert_business(conn: &mut PgConnection, business: &Business) -> ServiceResult<Business> {
    let record = sqlx::query_as::<_, Business>(concat!(
        r#"
        INSERT INTO businesses (
            id, registration_id, owner_user_id, business_name, category, tax_id, description,
            website, logo_url, is_active, metadata, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING "#,
        business_columns!()
    ))
    .bind(business.id)
    .bind(business.registration_id)
    .bind(business.owner_user_id)
    .bind(&business.business_name)
    .bind(&business.category)
    .bind(business.tax_id.as_deref())
    .bind(business.description.as_deref())
    .bind(business.website.as_deref())
    .bind(business.logo_url.as_deref())
    .bind(business.is_active)
    .bind(&business.metadata)
    .bind(business.created_at)
    .bind(business.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(record)
}

/// Takes the business row lock that serializes primary-flag maintenance.
async fn lock_business(conn: &mut PgConnection, business_id: Uuid) -> ServiceResult<Business> {
    sqlx::query_as::<_, Business>(concat!(
        "SELECT ",
        business_columns!(),
        " FROM businesses WHERE id = $1 FOR UPDATE"
    ))
    .bind(business_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ServiceError::not_found("business", business_id))
}

async fn business_of_location(conn: &mut PgConnection, location_id: Uuid) -> ServiceResult<Uuid> {
    let row = sqlx::query("SELECT business_id FROM business_locations WHERE id = $1")
        .bind(location_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("location", location_id))?;
    Ok(row.try_get("business_id")?)
}

async fn fetch_locations(
    conn: &mut PgConnection,
    business_id: Uuid,
) -> ServiceResult<Vec<BusinessLocation>> {
    let records = sqlx::query_as::<_, BusinessLocation>(concat!(
        "SELECT ",
        location_columns!(),
        r#"
        FROM business_locations
        WHERE business_id = $1
        ORDER BY is_primary DESC, created_at ASC, id ASC
        "#
    ))
    .bind(business_id)
    .fetch_all(conn)
    .await?;

    Ok(records)
}

async fn ensure_place_id_free(
    conn: &mut PgConnection,
    place_id: Option<&str>,
    owner: Uuid,
) -> ServiceResult<()> {
    let Some(place_id) = place_id else {
        return Ok(());
    };
    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM business_locations
            WHERE external_place_id = $1 AND id <> $2
        )
        "#,
    )
    .bind(place_id)
    .bind(owner)
    .fetch_one(conn)
    .await?;

    if taken {
        return Err(ServiceError::conflict(
            "external_place_id",
            format!("place {} is already registered to another location", place_id),
        ));
    }
    Ok(())
}

async fn insert_location(
    conn: &mut PgConnection,
    location: &BusinessLocation,
) -> ServiceResult<BusinessLocation> {
    let record = sqlx::query_as::<_, BusinessLocation>(concat!(
        r#"
        INSERT INTO business_locations (
            id, business_id, location_name, formatted_address, street, city, state_region,
            postal_code, country, latitude, longitude, external_place_id, timezone, phone, email,
            is_active, is_primary, operating_hours, notes, metadata, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
            $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
        )
        RETURNING "#,
        location_columns!()
    ))
    .bind(location.id)
    .bind(location.business_id)
    .bind(&location.location_name)
    .bind(&location.formatted_address)
    .bind(location.street.as_deref())
    .bind(location.city.as_deref())
    .bind(location.state_region.as_deref())
    .bind(location.postal_code.as_deref())
    .bind(location.country.as_deref())
    .bind(location.latitude)
    .bind(location.longitude)
    .bind(location.external_place_id.as_deref())
    .bind(location.timezone.as_deref())
    .bind(location.phone.as_deref())
    .bind(location.email.as_deref())
    .bind(location.is_active)
    .bind(location.is_primary)
    .bind(&location.operating_hours)
    .bind(location.notes.as_deref())
    .bind(&location.metadata)
    .bind(location.created_at)
    .bind(location.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(record)
}

async fn write_location(
    conn: &mut PgConnection,
    location: &BusinessLocation,
) -> ServiceResult<BusinessLocation> {
    let record = sqlx::query_as::<_, BusinessLocation>(concat!(
        r#"
        UPDATE business_locations
        SET
            location_name = $2,
            formatted_address = $3,
            street = $4,
            city = $5,
            state_region = $6,
            postal_code = $7,
            country = $8,
            latitude = $9,
            longitude = $10,
            external_place_id = $11,
            timezone = $12,
            phone = $13,
            email = $14,
            is_active = $15,
            is_primary = $16,
            operating_hours = $17,
            notes = $18,
            metadata = $19,
            updated_at = $20
        WHERE id = $1
        RETURNING "#,
        location_columns!()
    ))
    .bind(location.id)
    .bind(&location.location_name)
    .bind(&location.formatted_address)
    .bind(location.street.as_deref())
    .bind(location.city.as_deref())
    .bind(location.state_region.as_deref())
    .bind(location.postal_code.as_deref())
    .bind(location.country.as_deref())
    .bind(location.latitude)
    .bind(location.longitude)
    .bind(location.external_place_id.as_deref())
    .bind(location.timezone.as_deref())
    .bind(location.phone.as_deref())
    .bind(location.email.as_deref())
    .bind(location.is_active)
    .bind(location.is_primary)
    .bind(&location.operating_hours)
    .bind(location.notes.as_deref())
    .bind(&location.metadata)
    .bind(location.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(record)
}

/// Clears the primary flag on every location of the business except `keep`.
async fn clear_primary(
    conn: &mut PgConnection,
    business_id: Uuid,
    keep: Option<Uuid>,
) -> ServiceResult<()> {
    sqlx::query(
        r#"
        UPDATE business_locations
        SET is_primary = FALSE, updated_at = NOW()
        WHERE business_id = $1 AND is_primary AND id IS DISTINCT FROM $2
        "#,
    )
    .bind(business_id)
    .bind(keep)
    .execute(conn)
    .await?;

    Ok(())
}

async fn mark_primary(conn: &mut PgConnection, location_id: Uuid) -> ServiceResult<BusinessLocation> {
    let record = sqlx::query_as::<_, BusinessLocation>(concat!(
        r#"
        UPDATE business_locations
        SET is_primary = TRUE, updated_at = NOW()
        WHERE id = $1
        RETURNING "#,
        location_columns!()
    ))
    .bind(location_id)
    .fetch_one(conn)
    .await?;

    Ok(record)
}

/// Deletes the given locations with their claims, promotions and grants.
async fn cascade_locations(conn: &mut PgConnection, location_ids: &[Uuid]) -> ServiceResult<()> {
    sqlx::query(
        r#"
        DELETE FROM business_promotion_claims
        WHERE promotion_id IN (
            SELECT id FROM business_promotions WHERE location_id = ANY($1)
        )
        "#,
    )
    .bind(location_ids)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM business_promotions WHERE location_id = ANY($1)")
        .bind(location_ids)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM location_admins WHERE location_id = ANY($1)")
        .bind(location_ids)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM business_locations WHERE id = ANY($1)")
        .bind(location_ids)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Shared-locks a location so it cannot disappear under a new dependent row.
async fn lock_live_location(conn: &mut PgConnection, location_id: Uuid) -> ServiceResult<()> {
    let row = sqlx::query("SELECT is_active FROM business_locations WHERE id = $1 FOR SHARE")
        .bind(location_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("location", location_id))?;

    if !row.try_get::<bool, _>("is_active")? {
        return Err(ServiceError::validation(
            "location_id",
            format!("location {} is inactive", location_id),
        ));
    }
    Ok(())
}

async fn lock_promotion(
    conn: &mut PgConnection,
    promotion_id: Uuid,
) -> ServiceResult<BusinessPromotion> {
    sqlx::query_as::<_, BusinessPromotion>(concat!(
        "SELECT ",
        promotion_columns!(),
        " FROM business_promotions WHERE id = $1 FOR UPDATE"
    ))
    .bind(promotion_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ServiceError::not_found("promotion", promotion_id))
}

async fn write_promotion(
    conn: &mut PgConnection,
    promotion: &BusinessPromotion,
) -> ServiceResult<BusinessPromotion> {
    let record = sqlx::query_as::<_, BusinessPromotion>(concat!(
        r#"
        UPDATE business_promotions
        SET
            title = $2,
            subtitle = $3,
            description = $4,
            promotion_type = $5,
            status = $6,
            image_url = $7,
            prize = $8,
            reward_points = $9,
            discount_percent = $10,
            max_claims = $11,
            per_user_limit = $12,
            total_claims = $13,
            requires_check_in = $14,
            requires_purchase = $15,
            terms = $16,
            metadata = $17,
            starts_at = $18,
            ends_at = $19,
            published_at = $20,
            updated_by = $21,
            updated_at = $22
        WHERE id = $1
        RETURNING "#,
        promotion_columns!()
    ))
    .bind(promotion.id)
    .bind(&promotion.title)
    .bind(promotion.subtitle.as_deref())
    .bind(promotion.description.as_deref())
    .bind(promotion.promotion_type)
    .bind(promotion.status)
    .bind(promotion.image_url.as_deref())
    .bind(promotion.prize.as_deref())
    .bind(promotion.reward_points)
    .bind(promotion.discount_percent)
    .bind(promotion.max_claims)
    .bind(promotion.per_user_limit)
    .bind(promotion.total_claims)
    .bind(promotion.requires_check_in)
    .bind(promotion.requires_purchase)
    .bind(promotion.terms.as_deref())
    .bind(&promotion.metadata)
    .bind(promotion.starts_at)
    .bind(promotion.ends_at)
    .bind(promotion.published_at)
    .bind(promotion.updated_by)
    .bind(promotion.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(record)
}

// ============================================================================
// STORE
// ============================================================================

#[async_trait]
impl Store for PgStore {
    async fn insert_registration(
        &self,
        registration: NewBusinessRegistration,
    ) -> ServiceResult<BusinessRegistration> {
        let registration = registration.into_registration();
        let record = sqlx::query_as::<_, BusinessRegistration>(concat!(
            r#"
            INSERT INTO business_registration_requests (
                id, user_id, business_id, name, category, address, description, phone, website,
                tax_id, document_urls, is_multi_user_team, status, owner_email, owner_username,
                rejection_reason, reviewer_notes, reviewer_id, reviewer_name, submitted_at,
                updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                $21
            )
            RETURNING "#,
            registration_columns!()
        ))
        .bind(registration.id)
        .bind(registration.user_id)
        .bind(registration.business_id)
        .bind(&registration.name)
        .bind(&registration.category)
        .bind(&registration.address)
        .bind(registration.description.as_deref())
        .bind(registration.phone.as_deref())
        .bind(registration.website.as_deref())
        .bind(registration.tax_id.as_deref())
        .bind(&registration.document_urls)
        .bind(registration.is_multi_user_team)
        .bind(registration.status)
        .bind(&registration.owner_email)
        .bind(&registration.owner_username)
        .bind(registration.rejection_reason.as_deref())
        .bind(registration.reviewer_notes.as_deref())
        .bind(registration.reviewer_id)
        .bind(registration.reviewer_name.as_deref())
        .bind(registration.submitted_at)
        .bind(registration.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_registration(
        &self,
        registration_id: Uuid,
    ) -> ServiceResult<Option<BusinessRegistration>> {
        let record = sqlx::query_as::<_, BusinessRegistration>(concat!(
            "SELECT ",
            registration_columns!(),
            " FROM business_registration_requests WHERE id = $1"
        ))
        .bind(registration_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_registrations_for_user(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<Vec<BusinessRegistration>> {
        let records = sqlx::query_as::<_, BusinessRegistration>(concat!(
            "SELECT ",
            registration_columns!(),
            r#"
            FROM business_registration_requests
            WHERE user_id = $1
            ORDER BY submitted_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn latest_registration_for_user(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<Option<BusinessRegistration>> {
        let record = sqlx::query_as::<_, BusinessRegistration>(concat!(
            "SELECT ",
            registration_columns!(),
            r#"
            FROM business_registration_requests
            WHERE user_id = $1
            ORDER BY submitted_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_pending_reviews(
        &self,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<PendingBusinessReview>> {
        let records = sqlx::query_as::<_, PendingBusinessReview>(
            r#"
            SELECT
                id,
                name,
                category,
                address,
                tax_id,
                document_urls,
                status,
                submitted_at,
                owner_email,
                owner_username
            FROM business_registration_requests
            WHERE status IN ('pending', 'under_review')
            ORDER BY submitted_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_review_events(
        &self,
        registration_id: Uuid,
    ) -> ServiceResult<Vec<BusinessReviewEvent>> {
        let records = sqlx::query_as::<_, BusinessReviewEvent>(concat!(
            "SELECT ",
            event_columns!(),
            r#"
            FROM business_review_events
            WHERE registration_id = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(registration_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn apply_review_action(&self, command: ReviewCommand) -> ServiceResult<ReviewOutcome> {
        workflow::validate_command(&command)?;
        let mut tx = self.pool.begin().await?;

        let current = lock_registration(tx.as_mut(), command.registration_id).await?;
        let next = workflow::next_status(current.status, command.action)?;
        let now = Utc::now();

        let mut updated = current.clone();
        let business = if workflow::needs_materialization(&current, next) {
            let (business, location) = hierarchy::business_from_registration(&current, now);
            let business = insert_business(tx.as_mut(), &business).await?;
            let location = insert_location(tx.as_mut(), &location).await?;
            updated.business_id = Some(business.id);
            Some(BusinessWithLocations {
                business,
                locations: vec![location],
            })
        } else {
            None
        };
        workflow::apply_command(&mut updated, &command, next, now);

        let registration = write_registration(tx.as_mut(), &updated).await?;
        let event = insert_event(tx.as_mut(), &command).await?;

        tx.commit().await?;

        Ok(ReviewOutcome {
            registration,
            event,
            business,
        })
    }

    async fn claim_for_review(
        &self,
        registration_id: Uuid,
        reviewer_id: Uuid,
        reviewer_name: String,
    ) -> ServiceResult<ReviewOutcome> {
        let mut tx = self.pool.begin().await?;

        let current = lock_registration(tx.as_mut(), registration_id).await?;
        let next = workflow::claim_status(current.status)?;
        let command = workflow::claim_command(registration_id, reviewer_id, reviewer_name);

        let mut updated = current;
        workflow::apply_command(&mut updated, &command, next, Utc::now());
        let registration = write_registration(tx.as_mut(), &updated).await?;
        let event = insert_event(tx.as_mut(), &command).await?;

        tx.commit().await?;

        Ok(ReviewOutcome {
            registration,
            event,
            business: None,
        })
    }

    async fn review_stats(&self, now: DateTime<Utc>) -> ServiceResult<ReviewStats> {
        let record = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE r.status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE r.status = 'under_review') AS under_review,
                COUNT(*) FILTER (WHERE r.status = 'approved') AS approved,
                COUNT(*) FILTER (WHERE r.status = 'rejected') AS rejected,
                COUNT(*) FILTER (WHERE r.status = 'suspended') AS suspended,
                COUNT(*) FILTER (WHERE r.status = 'approved'
                    AND d.decided_at >= $1 - INTERVAL '1 day') AS approved_today,
                COUNT(*) FILTER (WHERE r.status = 'rejected'
                    AND d.decided_at >= $1 - INTERVAL '1 day') AS rejected_today
            FROM business_registration_requests r
            LEFT JOIN (
                SELECT registration_id, MAX(created_at) AS decided_at
                FROM business_review_events
                WHERE action IN ('approve', 'reject')
                GROUP BY registration_id
            ) d ON d.registration_id = r.id
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let mean_hours_to_decision: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(EXTRACT(EPOCH FROM (d.decided_at - r.submitted_at))::float8) / 3600.0::float8
            FROM business_registration_requests r
            JOIN (
                SELECT registration_id, MIN(created_at) AS decided_at
                FROM business_review_events
                WHERE action IN ('approve', 'reject')
                GROUP BY registration_id
            ) d ON d.registration_id = r.id
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let approved = record.try_get::<i64, _>("approved")?;
        let rejected = record.try_get::<i64, _>("rejected")?;

        Ok(ReviewStats {
            total: record.try_get::<i64, _>("total")?,
            pending: record.try_get::<i64, _>("pending")?,
            under_review: record.try_get::<i64, _>("under_review")?,
            approved,
            rejected,
            suspended: record.try_get::<i64, _>("suspended")?,
            approved_today: record.try_get::<i64, _>("approved_today")?,
            rejected_today: record.try_get::<i64, _>("rejected_today")?,
            approval_rate: workflow::approval_rate(approved, rejected),
            mean_hours_to_decision,
        })
    }

    async fn purge_registration(&self, registration_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await?;

        lock_registration(tx.as_mut(), registration_id).await?;

        sqlx::query(
            "UPDATE businesses SET registration_id = NULL, updated_at = NOW() WHERE registration_id = $1",
        )
        .bind(registration_id)
        .execute(tx.as_mut())
        .await?;

        sqlx::query("DELETE FROM business_review_events WHERE registration_id = $1")
            .bind(registration_id)
            .execute(tx.as_mut())
            .await?;

        sqlx::query("DELETE FROM business_registration_requests WHERE id = $1")
            .bind(registration_id)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn get_business(&self, business_id: Uuid) -> ServiceResult<Option<BusinessWithLocations>> {
        let mut conn = self.pool.acquire().await?;

        let business = sqlx::query_as::<_, Business>(concat!(
            "SELECT ",
            business_columns!(),
            " FROM businesses WHERE id = $1"
        ))
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?;

        match business {
            Some(business) => {
                let locations = fetch_locations(&mut *conn, business_id).await?;
                Ok(Some(BusinessWithLocations {
                    business,
                    locations,
                }))
            }
            None => Ok(None),
        }
    }

    async fn list_businesses_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Business>> {
        let records = sqlx::query_as::<_, Business>(concat!(
            "SELECT ",
            business_columns!(),
            " FROM businesses WHERE owner_user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn update_business(
        &self,
        business_id: Uuid,
        changes: UpdateBusinessRequest,
    ) -> ServiceResult<Business> {
        let mut tx = self.pool.begin().await?;

        let mut business = lock_business(tx.as_mut(), business_id).await?;
        changes.apply_to_existing(&mut business);

        let record = sqlx::query_as::<_, Business>(concat!(
            r#"
            UPDATE businesses
            SET
                business_name = $2,
                category = $3,
                tax_id = $4,
                description = $5,
                website = $6,
                logo_url = $7,
                is_active = $8,
                metadata = $9,
                updated_at = $10
            WHERE id = $1
            RETURNING "#,
            business_columns!()
        ))
        .bind(business.id)
        .bind(&business.business_name)
        .bind(&business.category)
        .bind(business.tax_id.as_deref())
        .bind(business.description.as_deref())
        .bind(business.website.as_deref())
        .bind(business.logo_url.as_deref())
        .bind(business.is_active)
        .bind(&business.metadata)
        .bind(business.updated_at)
        .fetch_one(tx.as_mut())
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn delete_business(&self, business_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await?;

        lock_business(tx.as_mut(), business_id).await?;
        let location_ids: Vec<Uuid> = fetch_locations(tx.as_mut(), business_id)
            .await?
            .into_iter()
            .map(|l| l.id)
            .collect();
        cascade_locations(tx.as_mut(), &location_ids).await?;

        sqlx::query("DELETE FROM businesses WHERE id = $1")
            .bind(business_id)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn add_location(
        &self,
        location: NewBusinessLocation,
        make_primary: bool,
    ) -> ServiceResult<BusinessLocation> {
        let mut tx = self.pool.begin().await?;

        lock_business(tx.as_mut(), location.business_id).await?;
        ensure_place_id_free(tx.as_mut(), location.external_place_id.as_deref(), location.id)
            .await?;

        let siblings = fetch_locations(tx.as_mut(), location.business_id).await?;
        let is_primary = hierarchy::new_location_is_primary(&siblings, make_primary);
        let location = location.into_location(is_primary, Utc::now());

        if is_primary {
            clear_primary(tx.as_mut(), location.business_id, None).await?;
        }
        let record = insert_location(tx.as_mut(), &location).await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn get_location(&self, location_id: Uuid) -> ServiceResult<Option<BusinessLocation>> {
        let record = sqlx::query_as::<_, BusinessLocation>(concat!(
            "SELECT ",
            location_columns!(),
            " FROM business_locations WHERE id = $1"
        ))
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_locations_for_business(
        &self,
        business_id: Uuid,
    ) -> ServiceResult<Vec<BusinessLocation>> {
        let mut conn = self.pool.acquire().await?;
        fetch_locations(&mut *conn, business_id).await
    }

    async fn update_location(
        &self,
        location_id: Uuid,
        changes: UpdateLocationRequest,
    ) -> ServiceResult<BusinessLocation> {
        let mut tx = self.pool.begin().await?;

        let business_id = business_of_location(tx.as_mut(), location_id).await?;
        lock_business(tx.as_mut(), business_id).await?;

        // Re-read under the lock; the location may have gone meanwhile.
        let siblings = fetch_locations(tx.as_mut(), business_id).await?;
        let target = siblings
            .iter()
            .find(|l| l.id == location_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("location", location_id))?;

        let plan = hierarchy::plan_primary_change(&target, &siblings, &changes)?;
        if changes.external_place_id.is_some() {
            ensure_place_id_free(tx.as_mut(), changes.external_place_id.as_deref(), location_id)
                .await?;
        }

        let primary_after = match plan {
            PrimaryChange::Keep => None,
            PrimaryChange::Promote => Some(Some(location_id)),
            PrimaryChange::HandOff => {
                Some(hierarchy::primary_successor(&siblings, location_id).map(|l| l.id))
            }
        };

        let mut updated = target.clone();
        changes.apply_attributes(&mut updated);
        updated.is_active = changes.is_active.unwrap_or(target.is_active);
        updated.updated_at = Utc::now();

        // Statement order keeps at most one primary and no inactive primary
        // at every step.
        if let Some(primary) = primary_after {
            clear_primary(tx.as_mut(), business_id, Some(location_id)).await?;
            updated.is_primary = primary == Some(location_id);
        }
        let record = write_location(tx.as_mut(), &updated).await?;
        if let Some(Some(heir)) = primary_after.filter(|p| *p != Some(location_id)) {
            mark_primary(tx.as_mut(), heir).await?;
        }

        tx.commit().await?;

        Ok(record)
    }

    async fn set_primary_location(
        &self,
        business_id: Uuid,
        location_id: Uuid,
    ) -> ServiceResult<BusinessLocation> {
        let mut tx = self.pool.begin().await?;

        lock_business(tx.as_mut(), business_id).await?;
        let siblings = fetch_locations(tx.as_mut(), business_id).await?;
        let target = siblings
            .iter()
            .find(|l| l.id == location_id && l.is_active)
            .ok_or_else(|| ServiceError::not_found("location", location_id))?;

        let record = if target.is_primary {
            target.clone()
        } else {
            clear_primary(tx.as_mut(), business_id, None).await?;
            mark_primary(tx.as_mut(), location_id).await?
        };

        tx.commit().await?;

        Ok(record)
    }

    async fn remove_location(&self, location_id: Uuid) -> ServiceResult<RemovedLocation> {
        let mut tx = self.pool.begin().await?;

        let business_id = business_of_location(tx.as_mut(), location_id).await?;
        lock_business(tx.as_mut(), business_id).await?;

        let siblings = fetch_locations(tx.as_mut(), business_id).await?;
        let removed = siblings
            .iter()
            .find(|l| l.id == location_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("location", location_id))?;

        cascade_locations(tx.as_mut(), &[location_id]).await?;

        let promoted = match hierarchy::primary_successor(&siblings, location_id) {
            Some(heir) if removed.is_primary => Some(mark_primary(tx.as_mut(), heir.id).await?),
            _ => None,
        };

        tx.commit().await?;

        Ok(RemovedLocation { removed, promoted })
    }

    async fn insert_promotion(
        &self,
        promotion: BusinessPromotion,
    ) -> ServiceResult<BusinessPromotion> {
        promotions::validate_schedule(promotion.starts_at, promotion.ends_at)?;
        let mut tx = self.pool.begin().await?;

        lock_live_location(tx.as_mut(), promotion.location_id).await?;

        let record = sqlx::query_as::<_, BusinessPromotion>(concat!(
            r#"
            INSERT INTO business_promotions (
                id, location_id, title, subtitle, description, promotion_type, status, image_url,
                prize, reward_points, discount_percent, max_claims, per_user_limit, total_claims,
                requires_check_in, requires_purchase, terms, metadata, starts_at, ends_at,
                published_at, created_by, updated_by, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            RETURNING "#,
            promotion_columns!()
        ))
        .bind(promotion.id)
        .bind(promotion.location_id)
        .bind(&promotion.title)
        .bind(promotion.subtitle.as_deref())
        .bind(promotion.description.as_deref())
        .bind(promotion.promotion_type)
        .bind(promotion.status)
        .bind(promotion.image_url.as_deref())
        .bind(promotion.prize.as_deref())
        .bind(promotion.reward_points)
        .bind(promotion.discount_percent)
        .bind(promotion.max_claims)
        .bind(promotion.per_user_limit)
        .bind(promotion.total_claims)
        .bind(promotion.requires_check_in)
        .bind(promotion.requires_purchase)
        .bind(promotion.terms.as_deref())
        .bind(&promotion.metadata)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.published_at)
        .bind(promotion.created_by)
        .bind(promotion.updated_by)
        .bind(promotion.created_at)
        .bind(promotion.updated_at)
        .fetch_one(tx.as_mut())
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn get_promotion(
        &self,
        promotion_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<BusinessPromotion>> {
        let record = sqlx::query_as::<_, BusinessPromotion>(concat!(
            "SELECT ",
            promotion_columns!(),
            " FROM business_promotions WHERE id = $1"
        ))
        .bind(promotion_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|p| promotions::observe(p, now)))
    }

    async fn list_promotions_for_location(
        &self,
        location_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<BusinessPromotion>> {
        let records = sqlx::query_as::<_, BusinessPromotion>(concat!(
            "SELECT ",
            promotion_columns!(),
            r#"
            FROM business_promotions
            WHERE location_id = $1
            ORDER BY starts_at DESC
            "#
        ))
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(|p| promotions::observe(p, now))
            .collect())
    }

    async fn list_promotions_for_business(
        &self,
        business_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<BusinessPromotion>> {
        let records = sqlx::query_as::<_, BusinessPromotion>(
            r#"
            SELECT
                p.id, p.location_id, p.title, p.subtitle, p.description, p.promotion_type,
                p.status, p.image_url, p.prize, p.reward_points, p.discount_percent,
                p.max_claims, p.per_user_limit, p.total_claims, p.requires_check_in,
                p.requires_purchase, p.terms, p.metadata, p.starts_at, p.ends_at,
                p.published_at, p.created_by, p.updated_by, p.created_at, p.updated_at
            FROM business_promotions p
            INNER JOIN business_locations l ON p.location_id = l.id
            WHERE l.business_id = $1
            ORDER BY p.starts_at DESC
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(|p| promotions::observe(p, now))
            .collect())
    }

    async fn update_promotion(
        &self,
        promotion_id: Uuid,
        changes: UpdatePromotionRequest,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion> {
        let mut tx = self.pool.begin().await?;

        let mut promotion = lock_promotion(tx.as_mut(), promotion_id).await?;
        promotions::apply_update(&mut promotion, &changes, actor_id, now)?;
        let record = write_promotion(tx.as_mut(), &promotion).await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn publish_promotion(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion> {
        let mut tx = self.pool.begin().await?;

        let mut promotion = lock_promotion(tx.as_mut(), promotion_id).await?;
        promotions::publish(&mut promotion, actor_id, now)?;
        let record = write_promotion(tx.as_mut(), &promotion).await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn cancel_promotion(
        &self,
        promotion_id: Uuid,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ServiceResult<BusinessPromotion> {
        let mut tx = self.pool.begin().await?;

        let mut promotion = lock_promotion(tx.as_mut(), promotion_id).await?;
        let record = if promotions::cancel(&mut promotion, actor_id, now)? {
            write_promotion(tx.as_mut(), &promotion).await?
        } else {
            promotion
        };

        tx.commit().await?;

        Ok(record)
    }

    async fn record_claim(
        &self,
        promotion_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<ClaimReceipt> {
        let mut tx = self.pool.begin().await?;

        let mut promotion = lock_promotion(tx.as_mut(), promotion_id).await?;
        let user_claims: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM business_promotion_claims WHERE promotion_id = $1 AND user_id = $2",
        )
        .bind(promotion_id)
        .bind(user_id)
        .fetch_one(tx.as_mut())
        .await?;

        promotions::check_claim(&promotion, user_claims as i32, now)
            .map_err(|reason| ServiceError::ClaimRejected { reason })?;

        promotion.total_claims += 1;
        promotion.status = promotions::observed_status(&promotion, now);
        promotion.updated_at = now;
        let promotion = write_promotion(tx.as_mut(), &promotion).await?;

        let claim = sqlx::query_as::<_, PromotionClaim>(
            r#"
            INSERT INTO business_promotion_claims (id, promotion_id, user_id, claimed_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, promotion_id, user_id, claimed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(promotion_id)
        .bind(user_id)
        .bind(now)
        .fetch_one(tx.as_mut())
        .await?;

        tx.commit().await?;

        Ok(ClaimReceipt { claim, promotion })
    }

    async fn sweep_promotions(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Mirrors promotions::observed_status; both only move forward in time.
        let expired = sqlx::query(
            r#"
            UPDATE business_promotions
            SET status = 'expired', updated_at = $1
            WHERE status IN ('draft', 'scheduled', 'active') AND ends_at <= $1
            "#,
        )
        .bind(now)
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        let started = sqlx::query(
            r#"
            UPDATE business_promotions
            SET status = 'active', updated_at = $1
            WHERE status = 'scheduled' AND starts_at <= $1 AND ends_at > $1
            "#,
        )
        .bind(now)
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(expired + started)
    }

    async fn upsert_location_admin(&self, grant: NewLocationAdmin) -> ServiceResult<LocationAdmin> {
        let mut tx = self.pool.begin().await?;

        lock_live_location(tx.as_mut(), grant.location_id).await?;

        let record = sqlx::query_as::<_, LocationAdmin>(concat!(
            r#"
            INSERT INTO location_admins (
                id, location_id, user_id, user_email, user_username, role, granted_by,
                granted_by_username, is_active, granted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, NOW(), NOW())
            ON CONFLICT (location_id, user_id) DO UPDATE
            SET
                user_email = EXCLUDED.user_email,
                user_username = EXCLUDED.user_username,
                role = EXCLUDED.role,
                granted_by = EXCLUDED.granted_by,
                granted_by_username = EXCLUDED.granted_by_username,
                is_active = TRUE,
                granted_at = EXCLUDED.granted_at,
                updated_at = NOW()
            RETURNING "#,
            admin_columns!()
        ))
        .bind(grant.id)
        .bind(grant.location_id)
        .bind(grant.user_id)
        .bind(&grant.user_email)
        .bind(&grant.user_username)
        .bind(grant.role)
        .bind(grant.granted_by)
        .bind(grant.granted_by_username.as_deref())
        .bind(grant.granted_at)
        .fetch_one(tx.as_mut())
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn revoke_location_admin(
        &self,
        location_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<LocationAdmin> {
        sqlx::query_as::<_, LocationAdmin>(concat!(
            r#"
            UPDATE location_admins
            SET
                is_active = FALSE,
                updated_at = CASE WHEN is_active THEN NOW() ELSE updated_at END
            WHERE location_id = $1 AND user_id = $2
            RETURNING "#,
            admin_columns!()
        ))
        .bind(location_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("location admin", user_id))
    }

    async fn list_admins_for_location(
        &self,
        location_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>> {
        let records = sqlx::query_as::<_, LocationAdmin>(concat!(
            "SELECT ",
            admin_columns!(),
            r#"
            FROM location_admins
            WHERE location_id = $1 AND ($2 OR is_active)
            ORDER BY granted_at DESC
            "#
        ))
        .bind(location_id)
        .bind(include_revoked)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_admins_for_user(
        &self,
        user_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>> {
        let records = sqlx::query_as::<_, LocationAdmin>(concat!(
            "SELECT ",
            admin_columns!(),
            r#"
            FROM location_admins
            WHERE user_id = $1 AND ($2 OR is_active)
            ORDER BY granted_at DESC
            "#
        ))
        .bind(user_id)
        .bind(include_revoked)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

async fn create_database_if_missing(database_url: &str) -> Result<(), sqlx::Error> {
    let options: PgConnectOptions = database_url.parse()?;
    let database_name = options
        .get_database()
        .map(|name| name.to_string())
        .unwrap_or_else(|| "postgres".to_string());

    if database_name.eq_ignore_ascii_case("postgres") {
        return Ok(());
    }

    let maintenance_options = options.clone().database("postgres");
    let mut connection = PgConnection::connect_with(&maintenance_options).await?;

    let escaped_name = database_name.replace('"', "\"\"");
    let create_stmt = format!("CREATE DATABASE \"{}\"", escaped_name);

    match connection.execute(create_stmt.as_str()).await {
        Ok(_) => {
            log::info!("Created database '{}'", database_name);
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.code() == Some(Cow::Borrowed("42P04")) => {
            log::info!("Database '{}' already exists", database_name);
            Ok(())
        }
        Err(err) => Err(err),
    }
}
