use carhub_rs::models::{Car, OwnershipPolicy};
use serde_json::{json, Value};

mod common;
use common::*;

async fn create_car(env: &TestEnvironment, body: Value) -> Car {
    let response = env
        .client
        .post(env.url("/api/cars"))
        .json(&body)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 201);
    response.json().await.expect("Failed to parse car")
}

async fn show_car(env: &TestEnvironment, id: u64) -> reqwest::Response {
    env.client
        .get(env.url(&format!("/api/cars/{}", id)))
        .send()
        .await
        .expect("Failed to send request")
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .get(env.url("/health/status"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["x-content-type-options"],
        "nosniff"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    let response = env
        .client
        .get(env.url("/metrics"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn test_create_then_show() {
    let env = TestEnvironment::new().await;

    let created = create_car(&env, json!({"name": "BMW", "user_id": 1})).await;
    assert_eq!(created.name, "BMW");
    assert_eq!(created.user_id, Some(1));

    let response = show_car(&env, created.id).await;
    assert_eq!(response.status().as_u16(), 200);

    let shown: Car = response.json().await.unwrap();
    assert_eq!(shown.id, created.id);
    assert_eq!(shown.name, "BMW");
    assert_eq!(shown.user_id, Some(1));
}

#[tokio::test]
async fn test_create_without_name_is_rejected() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .post(env.url("/api/cars"))
        .json(&json!({"user_id": 1}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"]["name"][0], "The name field is required.");
    assert!(env.cars.snapshot().is_empty());
}

#[tokio::test]
async fn test_create_without_owner() {
    let env = TestEnvironment::new().await;

    let created = create_car(&env, json!({"name": "Unowned"})).await;
    assert_eq!(created.user_id, None);
}

#[tokio::test]
async fn test_create_without_owner_rejected_when_required() {
    let env = TestEnvironment::with_policy(OwnershipPolicy::RequiredOwner).await;

    let response = env
        .client
        .post(env.url("/api/cars"))
        .json(&json!({"name": "Unowned"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert!(body["errors"]["user_id"].is_array());
}

#[tokio::test]
async fn test_create_with_unknown_user_is_rejected() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .post(env.url("/api/cars"))
        .json(&json!({"name": "Ghost", "user_id": 99}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"]["user_id"][0], "The selected user id is invalid.");
}

#[tokio::test]
async fn test_create_from_query_parameters() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .post(env.url("/api/cars?name=Skoda&user_id=2"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 201);
    let car: Car = response.json().await.unwrap();
    assert_eq!(car.name, "Skoda");
    assert_eq!(car.user_id, Some(2));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .post(env.url("/api/cars"))
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_new_car_takes_owner_from_previous_car() {
    let env = TestEnvironment::new().await;

    let first = create_car(&env, json!({"name": "A", "user_id": 1})).await;
    let second = create_car(&env, json!({"name": "B", "user_id": 1})).await;

    let first: Car = show_car(&env, first.id).await.json().await.unwrap();
    let second: Car = show_car(&env, second.id).await.json().await.unwrap();

    assert_eq!(first.user_id, None);
    assert_eq!(second.user_id, Some(1));
}

#[tokio::test]
async fn test_update_moves_owner() {
    let env = TestEnvironment::new().await;

    let first = create_car(&env, json!({"name": "A", "user_id": 1})).await;
    let second = create_car(&env, json!({"name": "B", "user_id": 2})).await;

    let response = env
        .client
        .put(env.url(&format!("/api/cars/{}", second.id)))
        .json(&json!({"user_id": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let updated: Car = response.json().await.unwrap();
    assert_eq!(updated.user_id, Some(1));
    assert_eq!(updated.name, "B");

    let first: Car = show_car(&env, first.id).await.json().await.unwrap();
    assert_eq!(first.user_id, None);
}

#[tokio::test]
async fn test_update_to_current_owner_keeps_car() {
    let env = TestEnvironment::new().await;

    let car = create_car(&env, json!({"name": "A", "user_id": 1})).await;

    let response = env
        .client
        .put(env.url(&format!("/api/cars/{}", car.id)))
        .json(&json!({"name": "A2", "user_id": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let updated: Car = response.json().await.unwrap();
    assert_eq!(updated.name, "A2");
    assert_eq!(updated.user_id, Some(1));
}

#[tokio::test]
async fn test_update_null_owner_unassigns() {
    let env = TestEnvironment::new().await;

    let car = create_car(&env, json!({"name": "A", "user_id": 3})).await;

    let response = env
        .client
        .put(env.url(&format!("/api/cars/{}", car.id)))
        .json(&json!({"user_id": null}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let updated: Car = response.json().await.unwrap();
    assert_eq!(updated.user_id, None);
}

#[tokio::test]
async fn test_update_missing_car_is_not_found() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .put(env.url("/api/cars/404"))
        .json(&json!({"name": ""}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_update_with_mismatched_car_id() {
    let env = TestEnvironment::new().await;

    let car = create_car(&env, json!({"name": "A"})).await;

    let response = env
        .client
        .put(env.url(&format!("/api/cars/{}", car.id)))
        .json(&json!({"car_id": car.id + 1, "name": "B"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert!(body["errors"]["car_id"].is_array());
}

#[tokio::test]
async fn test_destroy_then_show_is_not_found() {
    let env = TestEnvironment::new().await;

    let car = create_car(&env, json!({"name": "Doomed", "user_id": 1})).await;

    let response = env
        .client
        .delete(env.url(&format!("/api/cars/{}", car.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    assert_eq!(show_car(&env, car.id).await.status().as_u16(), 404);

    let response = env
        .client
        .delete(env.url(&format!("/api/cars/{}", car.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_show_unparsable_id_is_not_found() {
    let env = TestEnvironment::new().await;

    assert_eq!(
        env.client
            .get(env.url("/api/cars/not-a-number"))
            .send()
            .await
            .unwrap()
            .status()
            .as_u16(),
        404
    );
}

#[tokio::test]
async fn test_list_embeds_owners() {
    let env = TestEnvironment::new().await;

    create_car(&env, json!({"name": "A", "user_id": 2})).await;
    create_car(&env, json!({"name": "B"})).await;

    let response = env.client.get(env.url("/api/cars")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let cars: Vec<Value> = response.json().await.unwrap();
    assert_eq!(cars.len(), 2);
    assert_eq!(cars[0]["name"], "A");
    assert_eq!(cars[0]["user"]["id"], 2);
    assert_eq!(cars[0]["user"]["email"], "user2@example.com");
    assert_eq!(cars[1]["name"], "B");
    assert!(cars[1]["user"].is_null());
}

#[tokio::test]
async fn test_reassign_owner_skips_dissociation() {
    let env = TestEnvironment::new().await;

    let first = create_car(&env, json!({"name": "A", "user_id": 1})).await;
    let second = create_car(&env, json!({"name": "B"})).await;

    let response = env
        .client
        .put(env.url("/api/update-car-user"))
        .json(&json!({"car_id": second.id, "user_id": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["car"]["user_id"], 1);

    // Both cars now belong to user 1
    let first: Car = show_car(&env, first.id).await.json().await.unwrap();
    assert_eq!(first.user_id, Some(1));
}

#[tokio::test]
async fn test_reassign_owner_failures_are_bad_requests() {
    let env = TestEnvironment::new().await;

    let car = create_car(&env, json!({"name": "A"})).await;

    let cases = [
        json!({"car_id": car.id}),
        json!({"car_id": 999, "user_id": 1}),
        json!({"car_id": car.id, "user_id": 999}),
    ];

    for body in cases {
        let response = env
            .client
            .put(env.url("/api/update-car-user"))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400, "body: {}", body);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let env = TestEnvironment::new().await;

    let response = env
        .client
        .post(env.url("/api/cars"))
        .header("content-type", "text/plain")
        .body("name=BMW")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 415);
}
