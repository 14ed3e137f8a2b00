//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per accepted connection, upgrades
//! enabled for the guardian push channel.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::alerts::{AlertRepository, AlertStore};
use crate::broker::{self, BrokerConfig, NotificationBroker};
use crate::classifier::{ClassifierConfig, LlmRiskService, RiskClassifier};
use crate::config::Args;
use crate::db::SqliteAlertRepository;
use crate::routes;
use crate::server::websocket;
use crate::types::{LookoutError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Layered risk classifier
    pub classifier: Arc<RiskClassifier>,
    /// Alert persistence and notification queue
    pub alerts: Arc<AlertStore>,
    /// Live guardian push connections
    pub broker: Arc<NotificationBroker>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the pipeline from explicit parts (tests, embedding)
    pub fn new(
        args: Args,
        classifier: RiskClassifier,
        repo: Arc<dyn AlertRepository>,
    ) -> Self {
        let broker = Arc::new(NotificationBroker::new(broker_config(&args)));
        let alerts = AlertStore::start(repo, Arc::clone(&broker), args.activity_alert_minutes);

        Self {
            args,
            classifier: Arc::new(classifier),
            alerts,
            broker,
            started_at: Instant::now(),
        }
    }

    /// Production wiring: SQLite store and the configured semantic service
    pub fn from_args(args: Args) -> Result<Self> {
        let repo = SqliteAlertRepository::open(&args.database_path)?;
        let classifier = build_classifier(&args)?;
        Ok(Self::new(args, classifier, Arc::new(repo)))
    }
}

fn broker_config(args: &Args) -> BrokerConfig {
    BrokerConfig {
        heartbeat_timeout: args.heartbeat_timeout(),
        queue_capacity: args.connection_queue_capacity,
        write_timeout: args.write_timeout(),
        reap_interval: (args.heartbeat_interval() / 2).max(Duration::from_secs(1)),
    }
}

fn build_classifier(args: &Args) -> Result<RiskClassifier> {
    let semantic = &args.semantic;
    let timeout = Duration::from_millis(semantic.semantic_timeout_ms);

    let api_key = match semantic.semantic_api_key.as_deref() {
        Some(key) if args.semantic_enabled() => key,
        _ => {
            info!("No semantic API key configured, running keyword layer only");
            return Ok(RiskClassifier::keyword_only());
        }
    };

    let service = LlmRiskService::new(&semantic.semantic_url, api_key, &semantic.semantic_model, timeout)
        .map_err(|e| LookoutError::Config(format!("Failed to build semantic client: {}", e)))?;
    let service = Arc::new(service);

    info!("Semantic layer enabled ({} at {})", semantic.semantic_model, semantic.semantic_url);
    Ok(RiskClassifier::new(
        service.clone(),
        service,
        ClassifierConfig {
            semantic_timeout: timeout,
        },
    ))
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Lookout listening on {}", state.args.listen);
    serve(listener, state).await
}

/// Serve on an already-bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    broker::spawn_reaper(Arc::clone(&state.broker));
    info!(
        "Guardian push channel at /ws/guardian/{{guardian_id}} (heartbeat timeout {:?})",
        state.broker.config().heartbeat_timeout
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => routes::health_check(Arc::clone(&state)).await,

        (&Method::OPTIONS, _) => preflight_response(),

        // Guardian push channel
        (&Method::GET, ["ws", "guardian", guardian_id]) => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                let guardian_id = guardian_id.to_string();
                websocket::handle_guardian_upgrade(Arc::clone(&state), req, guardian_id)
            } else {
                bad_request_response("Guardian endpoint requires WebSocket upgrade")
            }
        }

        // Safety entry points
        (&Method::POST, ["api", "safety", "assess"]) => routes::handle_assess(Arc::clone(&state), req).await,
        (&Method::POST, ["api", "safety", "image"]) => routes::handle_image(Arc::clone(&state), req).await,
        (&Method::POST, ["api", "safety", "activity"]) => routes::handle_activity(Arc::clone(&state), req).await,
        (&Method::POST, ["api", "emergency"]) => routes::handle_emergency(Arc::clone(&state), req).await,

        // Alerts
        (&Method::POST, ["api", "alerts"]) => routes::handle_create_alert(Arc::clone(&state), req).await,
        (&Method::GET, ["api", "alerts", session_id]) => {
            routes::handle_list_session(Arc::clone(&state), session_id).await
        }
        (&Method::GET, ["api", "alerts", session_id, "unresolved"]) => {
            routes::handle_list_unresolved(Arc::clone(&state), session_id).await
        }
        (&Method::PUT, ["api", "alerts", alert_id, "resolve"]) => {
            routes::handle_resolve(Arc::clone(&state), alert_id).await
        }

        // Guardians
        (&Method::GET, ["api", "guardians", guardian_id, "alerts", "unresolved"]) => {
            routes::handle_guardian_unresolved(Arc::clone(&state), guardian_id).await
        }
        (&Method::GET, ["api", "guardians", guardian_id, "connections"]) => {
            routes::handle_guardian_connections(Arc::clone(&state), guardian_id)
        }

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    routes::json_response(StatusCode::BAD_REQUEST, &serde_json::json!({ "error": message }))
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "Not Found", "path": path }),
    )
}
