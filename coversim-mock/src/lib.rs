use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use ::time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time;

use crate::settings::Settings;
use crate::simulate::SimulatedMotor;

pub mod settings;
pub mod simulate;

const TICK: Duration = Duration::from_millis(100);

type Motors = Arc<Mutex<BTreeMap<String, SimulatedMotor>>>;

pub async fn run(settings: &Arc<Settings>) -> Result<(), Box<dyn std::error::Error>> {
    let motors: Motors = Arc::new(Mutex::new(
        settings
            .devices
            .iter()
            .map(|device| {
                (
                    device.name.clone(),
                    SimulatedMotor::new(device.position, Duration::from_millis(device.travel_ms)),
                )
            })
            .collect(),
    ));

    tokio::spawn(simulate(motors.clone()));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("mock device listening on {}", addr);

    axum::serve(listener, create_router(motors)).await?;

    Ok(())
}

pub fn create_router(motors: Motors) -> Router {
    Router::new()
        .route("/:name/up", any(raise))
        .route("/:name/down", any(lower))
        .route("/:name/stop", any(halt))
        .route("/:name/target/:pos", any(seek))
        .route("/:name/position", get(position))
        .with_state(motors)
}

async fn simulate(motors: Motors) {
    let mut interval = time::interval(TICK);

    loop {
        interval.tick().await;
        for motor in motors.lock().await.values_mut() {
            motor.advance(TICK);
        }
    }
}

async fn with_motor(
    motors: &Motors,
    name: &str,
    action: impl FnOnce(&mut SimulatedMotor),
) -> (StatusCode, Json<Value>) {
    let mut motors = motors.lock().await;

    match motors.get_mut(name) {
        Some(motor) => {
            action(motor);
            tracing::debug!("{} is {:?} at {}", name, motor.motion(), motor.position());
            (StatusCode::OK, Json(report(motor)))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown device {name}") })),
        ),
    }
}

fn report(motor: &SimulatedMotor) -> Value {
    json!({
        "position": motor.position(),
        "motion": motor.motion(),
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
    })
}

async fn raise(State(motors): State<Motors>, Path(name): Path<String>) -> (StatusCode, Json<Value>) {
    with_motor(&motors, &name, SimulatedMotor::raise).await
}

async fn lower(State(motors): State<Motors>, Path(name): Path<String>) -> (StatusCode, Json<Value>) {
    with_motor(&motors, &name, SimulatedMotor::lower).await
}

async fn halt(State(motors): State<Motors>, Path(name): Path<String>) -> (StatusCode, Json<Value>) {
    with_motor(&motors, &name, SimulatedMotor::halt).await
}

async fn seek(
    State(motors): State<Motors>,
    Path((name, pos)): Path<(String, u8)>,
) -> (StatusCode, Json<Value>) {
    with_motor(&motors, &name, |motor| motor.seek(pos)).await
}

async fn position(State(motors): State<Motors>, Path(name): Path<String>) -> (StatusCode, Json<Value>) {
    with_motor(&motors, &name, |_| {}).await
}
