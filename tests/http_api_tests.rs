mod common;

use actix_web::{http::StatusCode, test, web, App};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use business_review_core::handlers;

use common::{app_state, registration_request};

const ACTOR_ID: &str = "6f1c0a52-3b7e-4d55-9a55-3f2d8e0c1a11";

macro_rules! service {
    () => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(app_state()))
                .configure(handlers::configure),
        )
        .await
    };
}

fn as_actor(req: test::TestRequest) -> test::TestRequest {
    req.insert_header(("X-Actor-Id", ACTOR_ID))
        .insert_header(("X-Actor-Name", "Rita Reviewer"))
}

#[actix_rt::test]
async fn health_reports_ok() {
    let app = service!();
    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}

#[actix_rt::test]
async fn registration_review_round_trip() {
    let app = service!();

    let req = test::TestRequest::post()
        .uri("/api/v1/registrations")
        .set_json(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri("/api/v1/reviews/pending").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "approve", "notes": "All documents verified" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["registration"]["status"], "approved");
    assert_eq!(body["data"]["event"]["action"], "approve");
    assert_eq!(body["data"]["event"]["reviewer_name"], "Rita Reviewer");
    let locations = body["data"]["business"]["locations"].as_array().unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0]["is_primary"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reviews/{id}"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["history"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get().uri("/api/v1/reviews/stats").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["approved"], 1);
    assert_eq!(body["data"]["approval_rate"], 1.0);
}

#[actix_rt::test]
async fn latest_registration_for_user() {
    let app = service!();
    let user_id = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri("/api/v1/registrations")
        .set_json(registration_request(user_id, "Harbour Grill"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/registrations/users/{user_id}/latest"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["id"], id.as_str());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/registrations/users/{}/latest", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn review_errors_map_to_status_codes() {
    let app = service!();

    let req = test::TestRequest::post()
        .uri("/api/v1/registrations")
        .set_json(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    // Missing actor headers.
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "approve" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "reject" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("rejection_reason"));

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "suspend" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "escalate" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reviews/{}", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn promotion_claims_over_http() {
    let app = service!();

    let req = test::TestRequest::post()
        .uri("/api/v1/registrations")
        .set_json(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "approve" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let location_id = body["data"]["business"]["locations"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let now = Utc::now();
    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/locations/{location_id}/promotions"))
        .set_json(json!({
            "title": "Two for one",
            "promotion_type": "discount",
            "discount_percent": 50,
            "max_claims": 1,
            "starts_at": now - Duration::hours(1),
            "ends_at": now + Duration::hours(1),
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "draft");
    let promotion_id = body["data"]["id"].as_str().unwrap().to_string();

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/promotions/{promotion_id}/publish"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "active");

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/promotions/{promotion_id}/claims"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["promotion"]["total_claims"], 1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/promotions/{promotion_id}/claims"))
        .insert_header(("X-Actor-Id", Uuid::new_v4().to_string()))
        .insert_header(("X-Actor-Name", "Second Visitor"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("exhausted"));
}

#[actix_rt::test]
async fn location_admins_over_http() {
    let app = service!();

    let req = test::TestRequest::post()
        .uri("/api/v1/registrations")
        .set_json(registration_request(Uuid::new_v4(), "Harbour Grill"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/reviews/{id}/action"))
        .set_json(json!({ "action": "approve" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let location_id = body["data"]["business"]["locations"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let user_id = Uuid::new_v4();

    let req = as_actor(test::TestRequest::post())
        .uri(&format!("/api/v1/locations/{location_id}/admins"))
        .set_json(json!({
            "user_id": user_id,
            "user_email": "staff@example.com",
            "user_username": "floor_staff",
            "role": "staff",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["granted_by_username"], "Rita Reviewer");

    let req = as_actor(test::TestRequest::delete())
        .uri(&format!("/api/v1/locations/{location_id}/admins/{user_id}"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["is_active"], false);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/locations/{location_id}/admins"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{user_id}/location-admins?include_revoked=true"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
