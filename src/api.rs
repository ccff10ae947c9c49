use actix_web::{get, web, HttpResponse, HttpResponseBuilder, Responder};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::WatchConfig;
use crate::dashboard::DashboardAssembler;
use crate::database::{DocumentStore, StoreError};
use crate::error::{ensure_same_arity, TelemetryError};
use crate::schedule::ScheduleWatcher;
use crate::schema::{Collection, RequiredAttributes};
use crate::telemetry::TelemetryReader;
use crate::window::TimeWindow;

/// Settings shared by every handler.
#[derive(Clone, Debug, Default)]
pub struct ApiSettings {
    pub attributes: RequiredAttributes,
    pub watch: WatchConfig,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn error_response(mut builder: HttpResponseBuilder, kind: &str, message: String) -> HttpResponse {
    builder.json(ErrorBody { error: kind, message })
}

fn bad_request(message: String) -> HttpResponse {
    error_response(HttpResponse::BadRequest(), "BadRequest", message)
}

fn map_telemetry_error_to_http(err: TelemetryError) -> HttpResponse {
    let builder = match err {
        TelemetryError::InvalidWindow(_) | TelemetryError::ArityMismatch { .. } => {
            HttpResponse::BadRequest()
        }
        TelemetryError::MissingAttribute { .. } | TelemetryError::MalformedDocument { .. } => {
            HttpResponse::InternalServerError()
        }
        TelemetryError::WatchFailed(_) => HttpResponse::BadGateway(),
        TelemetryError::StoreUnavailable(_) => HttpResponse::ServiceUnavailable(),
    };
    error_response(builder, err.kind(), err.to_string())
}

fn map_call_to_http_response<R: Serialize>(result: Result<R, TelemetryError>) -> HttpResponse {
    match result {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(err) => map_telemetry_error_to_http(err),
    }
}

async fn open_session<D: DocumentStore>(db: &D) -> Result<D::Session, HttpResponse> {
    db.session()
        .await
        .map_err(|err: StoreError| map_telemetry_error_to_http(err.into()))
}

fn parse_id(name: &str, raw: &str) -> Result<i64, HttpResponse> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| bad_request(format!("Invalid {} parameter '{}'", name, raw)))
}

/// Parses a comma separated list such as `1,2,3`. An empty string is an empty list.
fn parse_id_list(name: &str, raw: Option<&str>) -> Result<Vec<i64>, HttpResponse> {
    let raw = raw.ok_or_else(|| bad_request(format!("Missing {} parameter.", name)))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',').map(|item| parse_id(name, item)).collect()
}

fn now_or_wall_clock(now: Option<i64>) -> i64 {
    now.unwrap_or_else(|| Utc::now().timestamp())
}

#[get("/status")]
pub async fn status() -> impl Responder {
    HttpResponse::Ok().body("Server is up and running!")
}

pub async fn not_found() -> HttpResponse {
    error_response(HttpResponse::NotFound(), "NotFound", "No such resource".to_string())
}

//#[get("/sensors/{id}/latest")]
pub async fn sensor_latest_reading<D: DocumentStore>(
    path: web::Path<String>,
    db: web::Data<D>,
) -> HttpResponse {
    let sensor_id = match parse_id("sensorId", &path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    map_call_to_http_response(TelemetryReader::new(&session).most_recent(sensor_id).await)
}

#[derive(Deserialize)]
pub struct NowQuery {
    now: Option<i64>,
}

//#[get("/sensors/{id}/readings/{window}")]
pub async fn sensor_window_readings<D: DocumentStore>(
    path: web::Path<(String, String)>,
    query: web::Query<NowQuery>,
    db: web::Data<D>,
) -> HttpResponse {
    let (raw_id, window) = path.into_inner();
    let sensor_id = match parse_id("sensorId", &raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    if let Err(err) = window.parse::<TimeWindow>() {
        return map_telemetry_error_to_http(err);
    }
    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let now = now_or_wall_clock(query.now);
    map_call_to_http_response(
        TelemetryReader::new(&session)
            .window_by_name(sensor_id, &window, now)
            .await,
    )
}

#[derive(Deserialize)]
pub struct ChartQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "sensorId")]
    sensor_id: Option<String>,
    now: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartResponse<T: Serialize> {
    sensor_data: T,
}

/// Single endpoint for chart widgets: `type` is a window name or `mostRecent`.
pub async fn sensor_chart<D: DocumentStore>(
    query: web::Query<ChartQuery>,
    db: web::Data<D>,
) -> HttpResponse {
    let sensor_id = match query.sensor_id.as_deref() {
        Some(raw) => match parse_id("sensorId", raw) {
            Ok(id) => id,
            Err(response) => return response,
        },
        None => return bad_request("Missing sensorId parameter.".to_string()),
    };
    let kind = query.kind.clone().unwrap_or_default();
    if kind != "mostRecent" {
        if let Err(err) = kind.parse::<TimeWindow>() {
            return map_telemetry_error_to_http(err);
        }
    }

    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let reader = TelemetryReader::new(&session);

    if kind == "mostRecent" {
        map_call_to_http_response(
            reader
                .most_recent(sensor_id)
                .await
                .map(|sensor_data| ChartResponse { sensor_data }),
        )
    } else {
        let now = now_or_wall_clock(query.now);
        map_call_to_http_response(
            reader
                .window_by_name(sensor_id, &kind, now)
                .await
                .map(|sensor_data| ChartResponse { sensor_data }),
        )
    }
}

#[derive(Deserialize)]
pub struct SensorUpdatesQuery {
    #[serde(rename = "sensorIds")]
    sensor_ids: Option<String>,
    #[serde(rename = "lastTimestamps")]
    last_timestamps: Option<String>,
}

//#[get("/sensors/updates")]
pub async fn sensor_updates<D: DocumentStore>(
    query: web::Query<SensorUpdatesQuery>,
    db: web::Data<D>,
) -> HttpResponse {
    let ids = parse_id_list("sensorIds", query.sensor_ids.as_deref());
    let watermarks = parse_id_list("lastTimestamps", query.last_timestamps.as_deref());
    let (ids, watermarks) = match (ids, watermarks) {
        (Ok(ids), Ok(watermarks)) => (ids, watermarks),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    if let Err(err) = ensure_same_arity(&ids, &watermarks) {
        return map_telemetry_error_to_http(err);
    }

    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    map_call_to_http_response(
        TelemetryReader::new(&session)
            .batch_newer_than(&ids, &watermarks)
            .await,
    )
}

#[derive(Deserialize)]
pub struct ScheduleChangesQuery {
    #[serde(rename = "scheduleIds")]
    schedule_ids: Option<String>,
    #[serde(rename = "lastModified")]
    last_modified: Option<String>,
}

//#[get("/schedules/changes")]
pub async fn schedule_changes<D: DocumentStore>(
    query: web::Query<ScheduleChangesQuery>,
    db: web::Data<D>,
) -> HttpResponse {
    let ids = parse_id_list("scheduleIds", query.schedule_ids.as_deref());
    let watermarks = parse_id_list("lastModified", query.last_modified.as_deref());
    let (ids, watermarks) = match (ids, watermarks) {
        (Ok(ids), Ok(watermarks)) => (ids, watermarks),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    if let Err(err) = ensure_same_arity(&ids, &watermarks) {
        return map_telemetry_error_to_http(err);
    }

    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    map_call_to_http_response(
        ScheduleWatcher::new(&session)
            .changed_since(&ids, &watermarks)
            .await,
    )
}

#[derive(Deserialize)]
pub struct NextChangeQuery {
    timeout: Option<u64>,
    since: Option<i64>,
}

//#[get("/schedules/{id}/next-change")]
pub async fn schedule_next_change<D: DocumentStore>(
    path: web::Path<String>,
    query: web::Query<NextChangeQuery>,
    db: web::Data<D>,
    settings: web::Data<ApiSettings>,
) -> HttpResponse {
    let schedule_id = match parse_id("scheduleID", &path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let wait = settings.watch.timeout(query.timeout);
    let mut watcher = ScheduleWatcher::new(&session);
    map_call_to_http_response(watcher.await_change(schedule_id, wait, query.since).await)
}

//#[get("/dashboard")]
pub async fn dashboard_snapshot<D: DocumentStore>(
    query: web::Query<NowQuery>,
    db: web::Data<D>,
    settings: web::Data<ApiSettings>,
) -> HttpResponse {
    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let now = now_or_wall_clock(query.now);
    map_call_to_http_response(
        DashboardAssembler::new(&session, &settings.attributes)
            .assemble(now)
            .await,
    )
}

//#[get("/collections/{name}")]
pub async fn collection_documents<D: DocumentStore>(
    path: web::Path<String>,
    query: web::Query<NowQuery>,
    db: web::Data<D>,
    settings: web::Data<ApiSettings>,
) -> HttpResponse {
    let collection = match path.into_inner().parse::<Collection>() {
        Ok(collection) => collection,
        Err(message) => return error_response(HttpResponse::NotFound(), "NotFound", message),
    };
    let session = match open_session(db.get_ref()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let now = now_or_wall_clock(query.now);
    map_call_to_http_response(
        DashboardAssembler::new(&session, &settings.attributes)
            .collection(collection, now)
            .await,
    )
}

/// Registers `/status` and the `/api` scope.
pub fn configure<D: DocumentStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(status).service(
        web::scope("/api")
            .route("/sensors/updates", web::get().to(sensor_updates::<D>))
            .route("/sensors/chart", web::get().to(sensor_chart::<D>))
            .route("/sensors/{id}/latest", web::get().to(sensor_latest_reading::<D>))
            .route(
                "/sensors/{id}/readings/{window}",
                web::get().to(sensor_window_readings::<D>),
            )
            .route("/schedules/changes", web::get().to(schedule_changes::<D>))
            .route(
                "/schedules/{id}/next-change",
                web::get().to(schedule_next_change::<D>),
            )
            .route("/dashboard", web::get().to(dashboard_snapshot::<D>))
            .route("/collections/{name}", web::get().to(collection_documents::<D>))
            .default_service(web::route().to(not_found)),
    );
}
