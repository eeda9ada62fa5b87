/**
 * The read-only HTTP API and the SSE event feed (default port 8002).
 *
 * Everything is JSON over GET, except the one authenticated POST that
 * updates the beacon comment. The SSE stream relays the internal event
 * bus plus a `connected` heartbeat every 15 seconds; a subscriber that
 * falls behind the broadcast buffer is dropped and expected to
 * reconnect.
 */
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rs1200::aprs::position::{grid_to_latlon, PositionReport};
use rs1200::ax25::Frame;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::reject::Rejection;
use warp::reply::Reply;
use warp::sse::Event;
use warp::Filter;

use crate::config::Config;
use crate::events::{EventBus, GateEvent};
use crate::messages::{MessageManager, TOCALL};
use crate::stations::{SortKey, StationDb};
use crate::txqueue::{Outbound, TxPriority, TxScheduler};

#[derive(Clone)]
pub struct WebState {
    pub stations: Arc<Mutex<StationDb>>,
    pub messages: Arc<Mutex<MessageManager>>,
    pub config: Arc<Mutex<Config>>,
    pub config_path: PathBuf,
    pub events: EventBus,
    pub tx: TxScheduler,
    pub started: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StationsQuery {
    sort_by: Option<String>,
}

#[derive(Deserialize)]
struct MessagesQuery {
    unread_only: Option<bool>,
}

#[derive(Deserialize)]
struct MonitoredQuery {
    limit: Option<usize>,
    callsign: Option<String>,
}

#[derive(Deserialize)]
struct BeaconUpdate {
    password: Option<String>,
    comment: String,
    #[serde(default)]
    tx: bool,
}

/// An API error serializable to JSON.
#[derive(Serialize)]
struct ErrorMessage {
    code: u16,
    message: String,
}

pub async fn serve(state: WebState, port: u16) {
    let with_state = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let stations = warp::path!("api" / "stations")
        .and(warp::get())
        .and(with_state.clone())
        .and(warp::query::<StationsQuery>())
        .and_then(stations_list);

    let station = warp::path!("api" / "stations" / String)
        .and(warp::get())
        .and(with_state.clone())
        .and_then(station_detail);

    let weather = warp::path!("api" / "weather")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(weather_list);

    let messages = warp::path!("api" / "messages")
        .and(warp::get())
        .and(with_state.clone())
        .and(warp::query::<MessagesQuery>())
        .and_then(messages_list);

    let monitored = warp::path!("api" / "monitored_messages")
        .and(warp::get())
        .and(with_state.clone())
        .and(warp::query::<MonitoredQuery>())
        .and_then(monitored_list);

    let status = warp::path!("api" / "status")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(status_summary);

    let digipeaters = warp::path!("api" / "digipeaters")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(digipeater_list);

    let digipeater = warp::path!("api" / "digipeaters" / String)
        .and(warp::get())
        .and(with_state.clone())
        .and_then(station_detail_named);

    let events = warp::path!("api" / "events")
        .and(warp::get())
        .and(with_state.clone())
        .map(event_stream);

    let beacon = warp::path!("api" / "beacon" / "comment")
        .and(warp::post())
        .and(with_state)
        .and(warp::body::json::<BeaconUpdate>())
        .and_then(beacon_comment);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST"]);

    let routes = stations
        .or(station)
        .or(weather)
        .or(messages)
        .or(monitored)
        .or(status)
        .or(digipeaters)
        .or(digipeater)
        .or(events)
        .or(beacon)
        .recover(handle_rejection)
        .with(cors);

    info!("web interface listening on {port}");
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}

async fn stations_list(
    state: WebState,
    query: StationsQuery,
) -> Result<warp::reply::Json, Infallible> {
    let sort = SortKey::parse(query.sort_by.as_deref().unwrap_or("last"));
    let stations = state.stations.lock().await.list(sort);
    Ok(warp::reply::json(&json!({
        "count": stations.len(),
        "stations": stations,
    })))
}

async fn station_detail(
    callsign: String,
    state: WebState,
) -> Result<warp::reply::Response, Infallible> {
    let station = state
        .stations
        .lock()
        .await
        .get(&callsign.to_uppercase());
    let reply = match station {
        Some(station) => warp::reply::json(&station).into_response(),
        None => warp::reply::with_status(
            warp::reply::json(&ErrorMessage {
                code: 404,
                message: format!("station {callsign} not heard"),
            }),
            StatusCode::NOT_FOUND,
        )
        .into_response(),
    };
    Ok(reply)
}

async fn station_detail_named(
    callsign: String,
    state: WebState,
) -> Result<warp::reply::Response, Infallible> {
    station_detail(callsign, state).await
}

async fn weather_list(
    state: WebState,
) -> Result<warp::reply::Json, Infallible> {
    let stations = state.stations.lock().await.weather_stations();
    Ok(warp::reply::json(&json!({
        "count": stations.len(),
        "stations": stations,
    })))
}

async fn messages_list(
    state: WebState,
    query: MessagesQuery,
) -> Result<warp::reply::Json, Infallible> {
    let messages = state.messages.lock().await;
    let list = messages.local_messages(query.unread_only.unwrap_or(false));
    Ok(warp::reply::json(&json!({
        "count": list.len(),
        "messages": list,
    })))
}

async fn monitored_list(
    state: WebState,
    query: MonitoredQuery,
) -> Result<warp::reply::Json, Infallible> {
    let messages = state.messages.lock().await;
    let list = messages.monitored_messages(
        query.limit.unwrap_or(100),
        query.callsign.as_deref(),
    );
    Ok(warp::reply::json(&json!({
        "count": list.len(),
        "messages": list,
    })))
}

async fn status_summary(
    state: WebState,
) -> Result<warp::reply::Json, Infallible> {
    let config = state.config.lock().await;
    let stations = state.stations.lock().await;
    Ok(warp::reply::json(&json!({
        "mycall": config.mycall,
        "uptime_seconds": (Utc::now() - state.started).num_seconds(),
        "station_count": stations.len(),
        "digipeat": config.digipeat,
        "beacon_comment": config.beacon_comment,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

async fn digipeater_list(
    state: WebState,
) -> Result<warp::reply::Json, Infallible> {
    let digipeaters = state.stations.lock().await.digipeaters();
    Ok(warp::reply::json(&json!({
        "count": digipeaters.len(),
        "digipeaters": digipeaters,
    })))
}

fn event_stream(state: WebState) -> impl Reply {
    let bus = BroadcastStream::new(state.events.subscribe())
        // A lagging subscriber ends its stream; the browser reconnects.
        .take_while(Result::is_ok)
        .filter_map(|event| {
            let event = event.ok()?;
            Some(Ok::<_, Infallible>(
                Event::default()
                    .event(event.name())
                    .data(event.payload().to_string()),
            ))
        });
    let heartbeat = IntervalStream::new(tokio::time::interval(
        Duration::from_secs(15),
    ))
    .map(|_| {
        Ok::<_, Infallible>(
            Event::default().event("connected").data("{}"),
        )
    });
    warp::sse::reply(bus.merge(heartbeat))
}

async fn beacon_comment(
    state: WebState,
    update: BeaconUpdate,
) -> Result<warp::reply::Response, Infallible> {
    let mut config = state.config.lock().await;
    let authorized = matches!(
        (&config.webui_password, &update.password),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        return Ok(warp::reply::with_status(
            warp::reply::json(&ErrorMessage {
                code: 401,
                message: "bad or missing password".to_string(),
            }),
            StatusCode::UNAUTHORIZED,
        )
        .into_response());
    }

    config.beacon_comment = update.comment.clone();
    if let Err(e) = config.save(&state.config_path) {
        warn!("config save failed: {e}");
    }

    let mut transmitted = false;
    if update.tx {
        if let Some(frame) = beacon_frame(&config) {
            state
                .tx
                .push(Outbound::new(frame, TxPriority::Beacon))
                .await;
            if let Some((latitude, longitude)) =
                config.mylocation.as_deref().and_then(grid_to_latlon)
            {
                state.events.publish(GateEvent::GpsUpdate(json!({
                    "latitude": latitude,
                    "longitude": longitude,
                    "source": "beacon",
                })));
            }
            transmitted = true;
        }
    }
    Ok(warp::reply::json(&json!({
        "status": "ok",
        "transmitted": transmitted,
    }))
    .into_response())
}

/// A position beacon from the configured locator, if there is one.
pub fn beacon_frame(config: &Config) -> Option<Frame> {
    let grid = config.mylocation.as_deref()?;
    let (latitude, longitude) = grid_to_latlon(grid)?;
    let (symbol_table, symbol_code) = config.beacon_symbol();
    let report = PositionReport {
        timestamp: None,
        latitude,
        longitude,
        symbol_table,
        symbol_code,
        messaging: true,
        course_deg: None,
        speed_knots: None,
        altitude_ft: None,
        range_miles: None,
        mice: None,
        comment: config.beacon_comment.clone(),
    };
    Some(Frame::ui(
        config.mycall(),
        TOCALL.parse().expect("tocall is valid"),
        config.beacon_path(),
        report.encode_uncompressed(),
    ))
}

// https://github.com/seanmonstar/warp/blob/master/examples/rejections.rs
async fn handle_rejection(
    err: Rejection,
) -> Result<impl Reply, Infallible> {
    let code;
    let message;

    if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Route not found, try /api/stations or /api/status";
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed";
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        code = StatusCode::BAD_REQUEST;
        message = "Invalid query";
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        code = StatusCode::BAD_REQUEST;
        message = "Invalid request body";
    } else {
        warn!("unhandled rejection: {:?}", err);
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Unknown error";
    }

    let json = warp::reply::json(&ErrorMessage {
        code: code.as_u16(),
        message: message.into(),
    });

    Ok(warp::reply::with_status(json, code))
}
