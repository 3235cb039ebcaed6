use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use scheduling_cell::handlers::SchedulingState;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Fixdesk scheduling API server");

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router and shared state
    let (app, state) = router::create_router();
    let app = app
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    spawn_expiry_sweeps(Arc::clone(&state));

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Periodic sweeps replacing a background transaction manager: unconfirmed
/// appointments past their SLA and scope changes past their approval timeout.
fn spawn_expiry_sweeps(state: Arc<SchedulingState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;

            if let Err(err) = state.sweeper.expire_pending_appointments().await {
                warn!("Appointment expiry sweep failed: {}", err);
            }
            if let Err(err) = state.sweeper.expire_pending_scope_changes().await {
                warn!("Scope change expiry sweep failed: {}", err);
            }
        }
    });
}
