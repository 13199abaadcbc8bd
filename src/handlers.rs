use actix_web::{
    delete, error::InternalError, get, post, put, web, HttpRequest, HttpResponse, Responder,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{
    AddLocationAdminRequest, ApiResponse, CreateBusinessRegistrationRequest,
    CreateLocationRequest, CreatePromotionRequest, ReviewActionRequest, UpdateBusinessRequest,
    UpdateLocationRequest, UpdatePromotionRequest,
};
use crate::state::AppState;

type HandlerResult = Result<HttpResponse, ServiceError>;

fn extract_actor_headers(req: &HttpRequest) -> Result<(Uuid, String), ServiceError> {
    let actor_id = req
        .headers()
        .get("X-Actor-Id")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| ServiceError::validation("X-Actor-Id", "missing or invalid header"))?;

    let actor_name = req
        .headers()
        .get("X-Actor-Name")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::validation("X-Actor-Name", "missing header"))?;

    Ok((actor_id, actor_name))
}

/// Storage failures are logged here; the client only sees a generic message.
fn failed(context: &str, err: ServiceError) -> ServiceError {
    if matches!(err, ServiceError::Storage { .. }) {
        log::error!("Failed to {context}: {err:?}");
    }
    err
}

/// Mounts every route under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let message = format!("Invalid payload: {}", err);
        InternalError::from_response(err, HttpResponse::BadRequest().json(ApiResponse::<()>::error(message)))
            .into()
    });

    cfg.app_data(json_config).service(
        web::scope("/api/v1")
            // Health
            .service(health_check)
            // Registrations
            .service(submit_registration)
            .service(list_registrations_for_user)
            .service(get_latest_registration_for_user)
            .service(get_registration)
            .service(purge_registration)
            // Review system; literal paths before `{registration_id}`
            .service(list_pending_reviews)
            .service(get_review_stats)
            .service(get_business_review)
            .service(submit_review_action)
            .service(claim_review)
            // Businesses
            .service(list_businesses_for_user)
            .service(get_business)
            .service(update_business)
            .service(delete_business)
            // Locations
            .service(create_location)
            .service(list_locations_for_business)
            .service(set_primary_location)
            .service(get_location)
            .service(update_location)
            .service(delete_location)
            // Promotions
            .service(create_promotion)
            .service(list_promotions_for_location)
            .service(list_promotions_for_business)
            .service(get_promotion)
            .service(update_promotion)
            .service(publish_promotion)
            .service(cancel_promotion)
            .service(claim_promotion)
            // Location admins
            .service(add_location_admin)
            .service(list_location_admins)
            .service(remove_location_admin)
            .service(list_location_admin_grants_for_user),
    );
}

// ============================================================================
// HEALTH CHECK
// ============================================================================

#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "business-review-core",
        "timestamp": chrono::Utc::now()
    }))
}

// ============================================================================
// BUSINESS REGISTRATIONS
// ============================================================================

#[post("/registrations")]
pub async fn submit_registration(
    state: web::Data<AppState>,
    payload: web::Json<CreateBusinessRegistrationRequest>,
) -> HandlerResult {
    let registration = state
        .registrations
        .submit(payload.into_inner())
        .await
        .map_err(|err| failed("create registration", err))?;
    Ok(HttpResponse::Created().json(ApiResponse::success(registration)))
}

#[get("/registrations/{registration_id}")]
pub async fn get_registration(
    state: web::Data<AppState>,
    registration_id: web::Path<Uuid>,
) -> HandlerResult {
    let details = state
        .reviews
        .get_with_history(registration_id.into_inner())
        .await
        .map_err(|err| failed("fetch registration", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(details)))
}

#[get("/registrations/users/{user_id}")]
pub async fn list_registrations_for_user(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
) -> HandlerResult {
    let registrations = state
        .registrations
        .list_for_user(user_id.into_inner())
        .await
        .map_err(|err| failed("list registrations", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(registrations)))
}

#[get("/registrations/users/{user_id}/latest")]
pub async fn get_latest_registration_for_user(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
) -> HandlerResult {
    let registration = state
        .registrations
        .latest_for_user(user_id.into_inner())
        .await
        .map_err(|err| failed("fetch latest registration", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(registration)))
}

#[delete("/registrations/{registration_id}")]
pub async fn purge_registration(
    req: HttpRequest,
    state: web::Data<AppState>,
    registration_id: web::Path<Uuid>,
) -> HandlerResult {
    let (actor_id, _actor_name) = extract_actor_headers(&req)?;
    let registration_id = registration_id.into_inner();

    state
        .registrations
        .purge(registration_id)
        .await
        .map_err(|err| failed("purge registration", err))?;
    log::info!("Registration {} purged by {}", registration_id, actor_id);
    Ok(HttpResponse::NoContent().finish())
}

// ============================================================================
// REVIEW SYSTEM
// ============================================================================

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[get("/reviews/pending")]
pub async fn list_pending_reviews(
    state: web::Data<AppState>,
    query: web::Query<PaginationQuery>,
) -> HandlerResult {
    let records = state
        .reviews
        .list_pending(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await
        .map_err(|err| failed("list pending reviews", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(records)))
}

#[get("/reviews/stats")]
pub async fn get_review_stats(state: web::Data<AppState>) -> HandlerResult {
    let stats = state
        .reviews
        .stats()
        .await
        .map_err(|err| failed("fetch review stats", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[get("/reviews/{registration_id}")]
pub async fn get_business_review(
    state: web::Data<AppState>,
    registration_id: web::Path<Uuid>,
) -> HandlerResult {
    let details = state
        .reviews
        .get_with_history(registration_id.into_inner())
        .await
        .map_err(|err| failed("fetch registration", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(details)))
}

#[post("/reviews/{registration_id}/action")]
pub async fn submit_review_action(
    req: HttpRequest,
    state: web::Data<AppState>,
    registration_id: web::Path<Uuid>,
    payload: web::Json<ReviewActionRequest>,
) -> HandlerResult {
    let (actor_id, actor_name) = extract_actor_headers(&req)?;
    let ReviewActionRequest {
        action,
        notes,
        rejection_reason,
    } = payload.into_inner();

    let outcome = state
        .reviews
        .apply_action(
            registration_id.into_inner(),
            action,
            Some(actor_id),
            Some(actor_name),
            notes,
            rejection_reason,
        )
        .await
        .map_err(|err| failed("record review event", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(outcome)))
}

#[post("/reviews/{registration_id}/claim")]
pub async fn claim_review(
    req: HttpRequest,
    state: web::Data<AppState>,
    registration_id: web::Path<Uuid>,
) -> HandlerResult {
    let (actor_id, actor_name) = extract_actor_headers(&req)?;
    let outcome = state
        .reviews
        .claim_for_review(registration_id.into_inner(), actor_id, actor_name)
        .await
        .map_err(|err| failed("claim registration for review", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(outcome)))
}

// ============================================================================
// BUSINESSES
// ============================================================================

#[get("/businesses/users/{user_id}")]
pub async fn list_businesses_for_user(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
) -> HandlerResult {
    let businesses = state
        .hierarchy
        .list_businesses_for_user(user_id.into_inner())
        .await
        .map_err(|err| failed("list businesses", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(businesses)))
}

#[get("/businesses/{business_id}")]
pub async fn get_business(
    state: web::Data<AppState>,
    business_id: web::Path<Uuid>,
) -> HandlerResult {
    let business = state
        .hierarchy
        .get_business(business_id.into_inner())
        .await
        .map_err(|err| failed("fetch business", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(business)))
}

#[put("/businesses/{business_id}")]
pub async fn update_business(
    req: HttpRequest,
    state: web::Data<AppState>,
    business_id: web::Path<Uuid>,
    payload: web::Json<UpdateBusinessRequest>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    let business = state
        .hierarchy
        .update_business(business_id.into_inner(), payload.into_inner())
        .await
        .map_err(|err| failed("update business", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(business)))
}

#[delete("/businesses/{business_id}")]
pub async fn delete_business(
    req: HttpRequest,
    state: web::Data<AppState>,
    business_id: web::Path<Uuid>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    state
        .hierarchy
        .delete_business(business_id.into_inner())
        .await
        .map_err(|err| failed("delete business", err))?;
    Ok(HttpResponse::NoContent().finish())
}

// ============================================================================
// BUSINESS LOCATIONS
// ============================================================================

#[post("/businesses/{business_id}/locations")]
pub async fn create_location(
    req: HttpRequest,
    state: web::Data<AppState>,
    business_id: web::Path<Uuid>,
    payload: web::Json<CreateLocationRequest>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    let location = state
        .hierarchy
        .add_location(business_id.into_inner(), payload.into_inner())
        .await
        .map_err(|err| failed("create location", err))?;
    Ok(HttpResponse::Created().json(ApiResponse::success(location)))
}

#[get("/businesses/{business_id}/locations")]
pub async fn list_locations_for_business(
    state: web::Data<AppState>,
    business_id: web::Path<Uuid>,
) -> HandlerResult {
    let locations = state
        .hierarchy
        .list_locations(business_id.into_inner())
        .await
        .map_err(|err| failed("list locations", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(locations)))
}

#[post("/businesses/{business_id}/locations/{location_id}/primary")]
pub async fn set_primary_location(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    let (business_id, location_id) = path.into_inner();
    let location = state
        .hierarchy
        .set_primary(business_id, location_id)
        .await
        .map_err(|err| failed("set primary location", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(location)))
}

#[get("/locations/{location_id}")]
pub async fn get_location(
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
) -> HandlerResult {
    let location = state
        .hierarchy
        .get_location(location_id.into_inner())
        .await
        .map_err(|err| failed("fetch location", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(location)))
}

#[put("/locations/{location_id}")]
pub async fn update_location(
    req: HttpRequest,
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
    payload: web::Json<UpdateLocationRequest>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    let location = state
        .hierarchy
        .update_location(location_id.into_inner(), payload.into_inner())
        .await
        .map_err(|err| failed("update location", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(location)))
}

#[delete("/locations/{location_id}")]
pub async fn delete_location(
    req: HttpRequest,
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    let removed = state
        .hierarchy
        .remove_location(location_id.into_inner())
        .await
        .map_err(|err| failed("delete location", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(removed)))
}

// ============================================================================
// BUSINESS PROMOTIONS
// ============================================================================

#[post("/locations/{location_id}/promotions")]
pub async fn create_promotion(
    req: HttpRequest,
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
    payload: web::Json<CreatePromotionRequest>,
) -> HandlerResult {
    let (actor_id, _actor_name) = extract_actor_headers(&req)?;
    let promotion = state
        .promotions
        .create(location_id.into_inner(), payload.into_inner(), Some(actor_id))
        .await
        .map_err(|err| failed("create promotion", err))?;
    Ok(HttpResponse::Created().json(ApiResponse::success(promotion)))
}

#[get("/locations/{location_id}/promotions")]
pub async fn list_promotions_for_location(
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
) -> HandlerResult {
    let promotions = state
        .promotions
        .list_for_location(location_id.into_inner())
        .await
        .map_err(|err| failed("list promotions", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(promotions)))
}

#[get("/businesses/{business_id}/promotions")]
pub async fn list_promotions_for_business(
    state: web::Data<AppState>,
    business_id: web::Path<Uuid>,
) -> HandlerResult {
    let promotions = state
        .promotions
        .list_for_business(business_id.into_inner())
        .await
        .map_err(|err| failed("list promotions", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(promotions)))
}

#[get("/promotions/{promotion_id}")]
pub async fn get_promotion(
    state: web::Data<AppState>,
    promotion_id: web::Path<Uuid>,
) -> HandlerResult {
    let promotion = state
        .promotions
        .get(promotion_id.into_inner())
        .await
        .map_err(|err| failed("fetch promotion", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(promotion)))
}

#[put("/promotions/{promotion_id}")]
pub async fn update_promotion(
    req: HttpRequest,
    state: web::Data<AppState>,
    promotion_id: web::Path<Uuid>,
    payload: web::Json<UpdatePromotionRequest>,
) -> HandlerResult {
    let (actor_id, _actor_name) = extract_actor_headers(&req)?;
    let promotion = state
        .promotions
        .update(promotion_id.into_inner(), payload.into_inner(), Some(actor_id))
        .await
        .map_err(|err| failed("update promotion", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(promotion)))
}

#[post("/promotions/{promotion_id}/publish")]
pub async fn publish_promotion(
    req: HttpRequest,
    state: web::Data<AppState>,
    promotion_id: web::Path<Uuid>,
) -> HandlerResult {
    let (actor_id, _actor_name) = extract_actor_headers(&req)?;
    let promotion = state
        .promotions
        .publish(promotion_id.into_inner(), Some(actor_id))
        .await
        .map_err(|err| failed("publish promotion", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(promotion)))
}

#[post("/promotions/{promotion_id}/cancel")]
pub async fn cancel_promotion(
    req: HttpRequest,
    state: web::Data<AppState>,
    promotion_id: web::Path<Uuid>,
) -> HandlerResult {
    let (actor_id, _actor_name) = extract_actor_headers(&req)?;
    let promotion = state
        .promotions
        .cancel(promotion_id.into_inner(), Some(actor_id))
        .await
        .map_err(|err| failed("cancel promotion", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(promotion)))
}

/// The claiming user is the authenticated actor.
#[post("/promotions/{promotion_id}/claims")]
pub async fn claim_promotion(
    req: HttpRequest,
    state: web::Data<AppState>,
    promotion_id: web::Path<Uuid>,
) -> HandlerResult {
    let (actor_id, _actor_name) = extract_actor_headers(&req)?;
    let receipt = state
        .promotions
        .record_claim(promotion_id.into_inner(), actor_id)
        .await
        .map_err(|err| failed("record claim", err))?;
    Ok(HttpResponse::Created().json(ApiResponse::success(receipt)))
}

// ============================================================================
// LOCATION ADMINS
// ============================================================================

#[derive(Deserialize)]
pub struct AdminListQuery {
    #[serde(default)]
    pub include_revoked: bool,
}

#[post("/locations/{location_id}/admins")]
pub async fn add_location_admin(
    req: HttpRequest,
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
    payload: web::Json<AddLocationAdminRequest>,
) -> HandlerResult {
    let (actor_id, actor_name) = extract_actor_headers(&req)?;
    let admin = state
        .admins
        .grant(
            location_id.into_inner(),
            payload.into_inner(),
            Some(actor_id),
            Some(actor_name),
        )
        .await
        .map_err(|err| failed("add location admin", err))?;
    Ok(HttpResponse::Created().json(ApiResponse::success(admin)))
}

#[get("/locations/{location_id}/admins")]
pub async fn list_location_admins(
    state: web::Data<AppState>,
    location_id: web::Path<Uuid>,
    query: web::Query<AdminListQuery>,
) -> HandlerResult {
    let admins = state
        .admins
        .list_for_location(location_id.into_inner(), query.include_revoked)
        .await
        .map_err(|err| failed("list location admins", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(admins)))
}

#[delete("/locations/{location_id}/admins/{user_id}")]
pub async fn remove_location_admin(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> HandlerResult {
    extract_actor_headers(&req)?;
    let (location_id, user_id) = path.into_inner();
    let admin = state
        .admins
        .revoke(location_id, user_id)
        .await
        .map_err(|err| failed("remove location admin", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(admin)))
}

#[get("/users/{user_id}/location-admins")]
pub async fn list_location_admin_grants_for_user(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
    query: web::Query<AdminListQuery>,
) -> HandlerResult {
    let grants = state
        .admins
        .list_for_user(user_id.into_inner(), query.include_revoked)
        .await
        .map_err(|err| failed("list location admin grants", err))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(grants)))
}
