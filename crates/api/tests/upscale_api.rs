//! HTTP-level tests for the `/api/upscale` resource.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, poll_until_terminal, post_json};
use serde_json::json;

fn upscale(scale_factor: i64) -> serde_json::Value {
    json!({
        "image_path": "uploads/foo.png",
        "scale_factor": scale_factor,
        "algorithm": "ultimate"
    })
}

// ---------------------------------------------------------------------------
// Test: an upscale completes with upscale URLs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upscale_completes_with_upscale_urls() {
    let t = common::build_test_app();
    let response = post_json(t.app(), "/api/upscale", upscale(2)).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let accepted = body_json(response).await;
    assert_eq!(accepted["status"], "pending");
    assert_eq!(accepted["scale_factor"], 2);
    assert_eq!(accepted["algorithm"], "ultimate");
    assert!(accepted["message"].is_string());
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let task = poll_until_terminal(&t, &task_id).await;
    assert_eq!(task["status"], "completed", "{task}");
    let url = task["image_urls"][0].as_str().unwrap();
    assert!(url.starts_with("/api/upscale/image/"), "{url}");

    let image = get(t.app(), url).await;
    assert_eq!(image.status(), StatusCode::OK);

    let view = body_json(get(t.app(), &format!("/api/upscale/{task_id}")).await).await;
    assert_eq!(view["status"], "completed");
    assert_eq!(view["scale_factor"], 2);
    assert_eq!(view["image_path"], "uploads/foo.png");
}

// ---------------------------------------------------------------------------
// Test: scale factor boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scale_factor_bounds_are_inclusive() {
    let t = common::build_test_app();

    for factor in [0, 5] {
        let response = post_json(t.app(), "/api/upscale", upscale(factor)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "factor {factor}");
        assert_eq!(body_json(response).await["detail"], "ParameterOutOfRange");
    }
    for factor in [1, 4] {
        let response = post_json(t.app(), "/api/upscale", upscale(factor)).await;
        assert_eq!(response.status(), StatusCode::CREATED, "factor {factor}");
    }
}

#[tokio::test]
async fn declared_but_unsupported_algorithm_is_rejected() {
    let t = common::build_test_app();
    let mut body = upscale(2);
    body["algorithm"] = json!("lanczos");

    let response = post_json(t.app(), "/api/upscale", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "AlgorithmUnsupported");
}

#[tokio::test]
async fn path_outside_upload_area_is_rejected() {
    let t = common::build_test_app();
    let mut body = upscale(2);
    body["image_path"] = json!("../etc/passwd");

    let response = post_json(t.app(), "/api/upscale", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "ReferenceImageMissing");
}

// ---------------------------------------------------------------------------
// Test: algorithm catalog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn algorithm_catalog_lists_all_algorithms() {
    let t = common::build_test_app();
    let json = body_json(get(t.app(), "/api/upscale/algorithms").await).await;

    let ids: Vec<&str> = json["algorithms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["ultimate", "lanczos", "bicubic", "nearest"]);
    assert_eq!(json["algorithms"][0]["max_scale"], 4);
}

// ---------------------------------------------------------------------------
// Test: batch upscale
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_reports_each_image() {
    let t = common::build_test_app();
    let body = json!({
        "image_paths": ["uploads/foo.png", "/abs/elsewhere.png"],
        "scale_factor": 2
    });

    let response = post_json(t.app(), "/api/upscale/batch", body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;

    assert_eq!(json["total"], 2);
    assert_eq!(json["submitted"].as_array().unwrap().len(), 1);
    assert_eq!(json["submitted"][0]["image_path"], "uploads/foo.png");
    assert_eq!(json["failed"][0]["image_path"], "/abs/elsewhere.png");
    assert_eq!(json["failed"][0]["detail"], "ReferenceImageMissing");
}

#[tokio::test]
async fn empty_batch_fails_validation() {
    let t = common::build_test_app();
    let response = post_json(t.app(), "/api/upscale/batch", json!({ "image_paths": [] })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: upscale view of a generation task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upscale_view_of_generation_is_404() {
    let t = common::build_test_app();
    let accepted = body_json(
        post_json(
            t.app(),
            "/api/generate",
            json!({ "base_model_code": "flux_dev", "description": "a dog" }),
        )
        .await,
    )
    .await;
    let task_id = accepted["task_id"].as_str().unwrap();

    let response = get(t.app(), &format!("/api/upscale/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
