//! Personal chat web server backed by the OpenAI API

use tokio_personal_chat_api::TASK_SENDER;
use tokio_personal_chat_api::api;
use tokio_personal_chat_api::core;
use tokio_personal_chat_api::core::openai::OpenAiClient;
use tokio_personal_chat_api::core::services::MyConversationService;
use tokio_personal_chat_api::infrastructure::database::DatabaseConnection;
use tokio_personal_chat_api::infrastructure::repositories::DbConversationRepository;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::response::Html;
use axum::routing::get;
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::info;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    // background task relaying completion requests to the OpenAI API
    let (task_sender, task_receiver) = mpsc::channel(10);
    let relay_join_handle = runtime.spawn(core::assistant::background_task(task_receiver));
    TASK_SENDER
        .set(task_sender)
        .expect("task sender should not be set");

    let web_task_handle = runtime.spawn(web_server_task());

    runtime.block_on(async {
        web_task_handle
            .await
            .expect("failed to join web_task_handle");
        relay_join_handle
            .await
            .expect("failed to join relay_join_handle");
    });

    Ok(())
}

async fn web_server_task() {
    let provider = ServiceCollection::new()
        .add(DatabaseConnection::singleton())
        .add(DbConversationRepository::scoped())
        .add(MyConversationService::scoped())
        .add(OpenAiClient::singleton())
        .build_provider()
        .unwrap();

    // apply pending migrations before accepting traffic
    let database = provider.get_required::<DatabaseConnection>();
    sqlx::migrate!()
        .run(&**database)
        .await
        .expect("failed to run database migrations");

    // build our application with a route
    let app = Router::new()
        .route("/", get(index))
        .nest_service(
            "/static",
            ServiceBuilder::new().service(ServeDir::new("static")),
        )
        .nest("/auth", api::auth::router())
        .nest("/conversations", api::conversations::router())
        .nest("/images", api::images::router())
        .nest("/audio", api::audio::router())
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_origin([
                    "http://localhost:3000".parse::<HeaderValue>().unwrap(),
                    "http://localhost:5173".parse::<HeaderValue>().unwrap(),
                ]),
        )
        .with_provider(provider);

    // run our app with hyper, listening globally on port 3000
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
    info!("Shutting down...");
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}
