//! Integration tests for the `/api/projects` endpoints used by GIS plugins.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, WORKER_NAME};
use geoengine_core::settings::SettingsStore;

#[tokio::test]
async fn list_projects_reports_registered_workers() {
    let env = common::build_test_app();
    let response = get(env.app, "/api/projects").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let projects = json.as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["name"], WORKER_NAME);
    assert_eq!(projects[0]["version"], "1.2.0");
    assert_eq!(projects[0]["tools_count"], 1);
    assert_eq!(projects[0]["plugins"]["qgis"], true);
    assert_eq!(projects[0]["plugins"]["arcgis"], false);
}

#[tokio::test]
async fn broken_manifest_is_listed_with_error() {
    let env = common::build_test_app();
    let broken = env.home.path().join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("geoengine.yaml"), "name: broken\n").unwrap();
    SettingsStore::at_home(env.home.path())
        .update(|s| {
            s.register_worker("broken", broken.clone());
            Ok(())
        })
        .unwrap();

    let json = body_json(get(env.app, "/api/projects").await).await;
    let broken = json
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "broken")
        .expect("broken worker should still be listed");
    assert_eq!(broken["tools_count"], 0);
    assert!(broken["error"].as_str().unwrap().contains("command"));
}

#[tokio::test]
async fn get_project_returns_summary() {
    let env = common::build_test_app();
    let response = get(env.app, &format!("/api/projects/{WORKER_NAME}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["description"], "Echoes its message");
    assert_eq!(json["path"], env.worker_dir.display().to_string());
}

#[tokio::test]
async fn project_tools_lists_inputs() {
    let env = common::build_test_app();
    let response = get(env.app, &format!("/api/projects/{WORKER_NAME}/tools")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let tools = json.as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], WORKER_NAME);

    let inputs = tools[0]["inputs"].as_array().unwrap();
    let names: Vec<&str> = inputs.iter().map(|i| i["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["message", "delay", "exit", "mode"]);
    assert_eq!(inputs[0]["required"], true);
    assert_eq!(inputs[3]["type"], "enum");
    assert_eq!(inputs[3]["enum_values"], serde_json::json!(["fast", "slow"]));
}

#[tokio::test]
async fn unknown_project_returns_404() {
    let env = common::build_test_app();
    let response = get(env.app, "/api/projects/missing/tools").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Worker 'missing' not found");
}
