//! Shared fakes for the integration tests: a scripted zone store, recording
//! telemetry, counting leases, and an axum server standing in for the
//! home-automation server.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use zonewatch::platform::headless::{FixedBattery, HeadlessRegionPlatform, NotificationCenter};
use zonewatch::platform::{
    BatteryState, ClientEvent, LeaseHandle, LeaseProvider, TelemetrySink,
};
use zonewatch::{
    DeviceIdentity, ErrorCategory, IdentifyPolicy, LocationEvent, LocationPipeline,
    NotificationDispatcher, NotificationPreferences, PipelineError, PolicyTable, RegionMonitor,
    ServerSettings, SubmissionClient, TriggerClassifier, Zone, ZoneRegistry, ZoneStore,
};

// ---

/// Zone store whose contents (or failure) the test controls.
pub struct ScriptedStore {
    next: Mutex<Result<Vec<Zone>, PipelineError>>,
    changes: broadcast::Sender<()>,
}

impl ScriptedStore {
    pub fn new(zones: Vec<Zone>) -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(Ok(zones)),
            changes: broadcast::channel(8).0,
        })
    }

    /// Replace the contents and announce the change.
    pub fn set_zones(&self, zones: Vec<Zone>) {
        *self.next.lock().unwrap() = Ok(zones);
        let _ = self.changes.send(());
    }

    pub fn fail(&self, detail: &str) {
        *self.next.lock().unwrap() = Err(PipelineError::store(detail));
    }
}

#[async_trait]
impl ZoneStore for ScriptedStore {
    async fn list(&self) -> Result<Vec<Zone>, PipelineError> {
        self.next.lock().unwrap().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub errors: Mutex<Vec<(ErrorCategory, String)>>,
    pub events: Mutex<Vec<ClientEvent>>,
}

impl RecordingTelemetry {
    pub fn error_categories(&self) -> Vec<ErrorCategory> {
        self.errors.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_error(&self, category: ErrorCategory, detail: &str) {
        self.errors.lock().unwrap().push((category, detail.to_string()));
    }

    fn record_event(&self, event: ClientEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Lease provider that never expires and counts acquire/release calls.
#[derive(Default)]
pub struct CountingLeases {
    next: AtomicU64,
    pub released: AtomicUsize,
}

impl CountingLeases {
    pub fn acquired(&self) -> usize {
        self.next.load(Ordering::SeqCst) as usize
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl LeaseProvider for CountingLeases {
    fn acquire(&self, _on_expire: Box<dyn FnOnce() + Send>) -> LeaseHandle {
        LeaseHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn release(&self, _handle: LeaseHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---

/// What the fake server saw and how it answers `device_tracker.see`.
pub struct ServerState {
    pub identify_calls: AtomicUsize,
    pub see_bodies: Mutex<Vec<Value>>,
    pub passwords: Mutex<Vec<Option<String>>>,
    see_response: Mutex<(StatusCode, String)>,
}

impl ServerState {
    pub fn respond_with(&self, status: StatusCode, body: &str) {
        *self.see_response.lock().unwrap() = (status, body.to_string());
    }

    pub fn see_bodies(&self) -> Vec<Value> {
        self.see_bodies.lock().unwrap().clone()
    }

    pub fn identify_calls(&self) -> usize {
        self.identify_calls.load(Ordering::SeqCst)
    }
}

fn password(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-ha-access")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

async fn identify(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> &'static str {
    state.identify_calls.fetch_add(1, Ordering::SeqCst);
    state.passwords.lock().unwrap().push(password(&headers));
    "ok"
}

async fn see(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.see_bodies.lock().unwrap().push(body);
    state.passwords.lock().unwrap().push(password(&headers));
    let (status, body) = state.see_response.lock().unwrap().clone();
    (status, [(header::CONTENT_TYPE, "application/json")], body)
}

/// Start the fake server on an ephemeral port. Returns its base URL.
pub async fn spawn_server() -> (String, Arc<ServerState>) {
    // ---
    let state = Arc::new(ServerState {
        identify_calls: AtomicUsize::new(0),
        see_bodies: Mutex::new(Vec::new()),
        passwords: Mutex::new(Vec::new()),
        see_response: Mutex::new((
            StatusCode::OK,
            r#"[{"entity_id":"device_tracker.phone","state":"home","attributes":{}}]"#.to_string(),
        )),
    });

    let app = Router::new()
        .route("/api/ios/identify", post(identify))
        .route("/api/services/device_tracker/see", post(see))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

// ---

pub fn settings(base_url: Option<String>) -> ServerSettings {
    ServerSettings {
        base_url,
        api_password: None,
        request_timeout: Duration::from_secs(2),
        identify_policy: IdentifyPolicy::OncePerSession,
    }
}

/// Everything a test needs to drive the pipeline end to end.
pub struct Harness {
    pub store: Arc<ScriptedStore>,
    pub platform: Arc<HeadlessRegionPlatform>,
    pub leases: Arc<CountingLeases>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub notifications: Arc<NotificationCenter>,
    pub monitor: RegionMonitor,
    pub events: mpsc::UnboundedReceiver<LocationEvent>,
    pub pipeline: LocationPipeline,
}

impl Harness {
    pub fn new(zones: Vec<Zone>, settings: ServerSettings) -> Self {
        // ---
        let store = ScriptedStore::new(zones);
        let platform = Arc::new(HeadlessRegionPlatform::new());
        let leases = Arc::new(CountingLeases::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let notifications = Arc::new(NotificationCenter::new());

        let (monitor, events) = RegionMonitor::new(
            ZoneRegistry::new(store.clone()),
            platform.clone(),
            leases.clone(),
            telemetry.clone(),
        );

        let submission = Arc::new(
            SubmissionClient::new(
                settings,
                DeviceIdentity::from_name("Test Phone"),
                vec!["location".to_string()],
                Arc::new(FixedBattery::new(0.5, BatteryState::Unplugged)),
                telemetry.clone(),
            )
            .unwrap(),
        );
        let dispatcher = Arc::new(NotificationDispatcher::new(
            notifications.clone(),
            telemetry.clone(),
        ));
        let classifier = TriggerClassifier::new(
            PolicyTable::default(),
            NotificationPreferences::with_enabled(zonewatch::LocationUpdateTrigger::ALL),
        );
        let pipeline = LocationPipeline::new(classifier, submission, dispatcher, telemetry.clone());

        Self {
            store,
            platform,
            leases,
            telemetry,
            notifications,
            monitor,
            events,
            pipeline,
        }
    }

    /// Next event the monitor emitted, if any.
    pub fn next_event(&mut self) -> Option<LocationEvent> {
        self.events.try_recv().ok()
    }
}
