use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use irrigation_telemetry::api::{self, ApiSettings};
use irrigation_telemetry::config::WatchConfig;
use irrigation_telemetry::database::{Document, Filter};
use irrigation_telemetry::memory_database::MemoryStore;
use irrigation_telemetry::schema::Collection;

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(
        Collection::Plants,
        doc(json!({
            "plantID": 1, "plantName": "Tomato", "plantType": "vegetable", "location": "bed-1",
            "controllerID": 1, "sensorIDs": [7], "pumpIDs": [1], "waterRequirement": 500,
            "imagePath": "/img/tomato.png", "wateringHistory": [{"timestamp": 450_000, "amount": 0.5}]
        })),
    );
    store.insert(
        Collection::Sensors,
        doc(json!({
            "sensorID": 7, "sensorName": "bed-1 moisture", "controllerID": 1, "gpioPort": 4,
            "type": "moisture",
            "readings": [
                {"value": 41.0, "timestamp": 100},
                {"value": 40.0, "timestamp": 200},
                {"value": 39.5, "timestamp": 300},
                {"value": 38.0, "timestamp": 420_000}
            ]
        })),
    );
    store.insert(
        Collection::Sensors,
        doc(json!({
            "sensorID": 8, "sensorName": "bed-1 temperature", "controllerID": 1, "gpioPort": 5,
            "type": "temperature",
            "readings": [{"value": 21.5, "timestamp": 250}]
        })),
    );
    store.insert(
        Collection::Schedules,
        doc(json!({
            "scheduleID": 1, "weekdays": ["tue"], "startTime": "07:00", "type": "timer",
            "plantID": 1, "controllerID": 1, "threshold": 30, "lastModified": 60
        })),
    );
    store.insert(
        Collection::Schedules,
        doc(json!({
            "scheduleID": 2, "weekdays": ["fri"], "startTime": "19:00", "type": "moisture",
            "plantID": 1, "controllerID": 1, "threshold": 35, "lastModified": 90
        })),
    );
    store.insert(
        Collection::IrrigationControllers,
        doc(json!({
            "controllerID": 1, "deviceName": "garden-pi", "deviceType": "production",
            "ipAddress": "192.168.1.20", "status": "online"
        })),
    );
    store.insert(
        Collection::Pumps,
        doc(json!({
            "name": "bed-1 pump", "controllerID": 1, "plantID": 1, "gpioPort": 17,
            "type": "diaphragm", "status": "idle", "flowRate": 2.0
        })),
    );
    store
}

fn settings() -> ApiSettings {
    ApiSettings {
        watch: WatchConfig {
            default_timeout_seconds: 1,
            max_timeout_seconds: 2,
        },
        ..ApiSettings::default()
    }
}

macro_rules! app {
    ($store:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($store.clone()))
                .app_data(web::Data::new(settings()))
                .configure(api::configure::<MemoryStore>),
        )
        .await
    };
}

macro_rules! get_json {
    ($app:expr, $uri:expr) => {{
        let response =
            test::call_service(&$app, test::TestRequest::get().uri($uri).to_request()).await;
        let status = response.status();
        let body = test::read_body(response).await;
        (status, serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null))
    }};
}

#[actix_web::test]
async fn status_is_up() {
    let store = seeded_store();
    let app = app!(store);
    let response =
        test::call_service(&app, test::TestRequest::get().uri("/status").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[actix_web::test]
async fn latest_reading() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/sensors/7/latest");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"value": 38.0, "timestamp": 420_000}));

    let (status, body) = get_json!(app, "/api/sensors/99/latest");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    let (status, body) = get_json!(app, "/api/sensors/seven/latest");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
}

#[actix_web::test]
async fn windowed_readings() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/sensors/7/readings/pastDay?now=500000");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"value": 38.0, "timestamp": 420_000}]));

    let (_, body) = get_json!(app, "/api/sensors/7/readings/all?now=0");
    assert_eq!(body.as_array().unwrap().len(), 4);

    let (status, body) = get_json!(app, "/api/sensors/7/readings/pastCentury");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidWindow");
}

#[actix_web::test]
async fn chart_dispatch() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/sensors/chart?type=mostRecent&sensorId=8");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensorData"]["timestamp"], 250);

    let (status, body) =
        get_json!(app, "/api/sensors/chart?type=pastDay&sensorId=7&now=500000");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensorData"].as_array().unwrap().len(), 1);

    let (status, _) = get_json!(app, "/api/sensors/chart?type=pastWeek");
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get_json!(app, "/api/sensors/chart?type=weekly&sensorId=7");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidWindow");
}

#[actix_web::test]
async fn batch_updates() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) =
        get_json!(app, "/api/sensors/updates?sensorIds=8,7&lastTimestamps=0,200");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["8"].as_array().unwrap().len(), 1);
    assert_eq!(body["7"].as_array().unwrap().len(), 2);

    let (status, body) =
        get_json!(app, "/api/sensors/updates?sensorIds=8,7&lastTimestamps=0");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ArityMismatch");

    let (status, body) =
        get_json!(app, "/api/sensors/updates?sensorIds=7,8,7&lastTimestamps=200,0,0");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_object().unwrap().len(), 2);
    assert_eq!(body["7"].as_array().unwrap().len(), 4);

    let (status, body) = get_json!(app, "/api/sensors/updates?sensorIds=&lastTimestamps=5");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ArityMismatch");
}

#[actix_web::test]
async fn changed_schedules() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) =
        get_json!(app, "/api/schedules/changes?scheduleIds=1,2&lastModified=50,80");
    assert_eq!(status, StatusCode::OK);
    let schedules = body.as_array().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0]["scheduleID"], 2);
}

#[actix_web::test]
async fn next_change_times_out_then_resolves() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/schedules/5/next-change?timeout=1");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "timedOut"}));
    assert_eq!(store.open_watchers(), 0);
    assert_eq!(store.open_sessions(), 0);

    let (status, body) = get_json!(app, "/api/schedules/1/next-change?timeout=1&since=50");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "current");
    assert_eq!(body["document"]["lastModified"], 60);

    let writer = store.clone();
    let edit = actix_web::rt::spawn(async move {
        actix_web::rt::time::sleep(std::time::Duration::from_millis(100)).await;
        writer.update(
            Collection::Schedules,
            &Filter::eq("scheduleID", 2),
            doc(json!({"lastModified": 95})),
        );
    });
    let (status, body) = get_json!(app, "/api/schedules/2/next-change?timeout=2&since=90");
    edit.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "changed");
    assert_eq!(body["event"]["fullDocument"]["lastModified"], 95);
    assert_eq!(store.open_watchers(), 0);
}

#[actix_web::test]
async fn dashboard_snapshot() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/dashboard?now=500000");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plants"].as_array().unwrap().len(), 1);
    assert_eq!(body["controllers"].as_array().unwrap().len(), 1);
    assert_eq!(body["pumps"].as_array().unwrap().len(), 1);
    assert_eq!(body["schedules"].as_array().unwrap().len(), 2);
    let sensors = body["sensors"].as_array().unwrap();
    assert_eq!(sensors[0]["readings"].as_array().unwrap().len(), 1);
    assert!(sensors[1]["readings"].as_array().unwrap().is_empty());
    assert_eq!(store.open_sessions(), 0);
}

#[actix_web::test]
async fn dashboard_rejects_invalid_pumps_atomically() {
    let store = seeded_store();
    store.insert(
        Collection::Pumps,
        doc(json!({
            "name": "bed-2 pump", "controllerID": 1, "plantID": 2, "gpioPort": 27,
            "type": "diaphragm", "status": "idle"
        })),
    );
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/dashboard?now=500000");
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "MissingAttribute");
    assert!(body.get("plants").is_none());
    assert_eq!(store.open_sessions(), 0);
}

#[actix_web::test]
async fn unavailable_store_is_503() {
    let store = seeded_store();
    store.set_available(false);
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/dashboard");
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "StoreUnavailable");
}

#[actix_web::test]
async fn single_collection() {
    let store = seeded_store();
    let app = app!(store);

    let (status, body) = get_json!(app, "/api/collections/irrigation_controllers");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["deviceName"], "garden-pi");

    let (status, _) = get_json!(app, "/api/collections/valves");
    assert_eq!(status, StatusCode::NOT_FOUND);
}
