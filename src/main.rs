use actix_web::dev::Service;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use login_gateway::auth::{client_ip, handlers};
use login_gateway::{cors, health_check, AppError, AppState, Settings};
use std::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> login_gateway::Result<()> {
    // Load environment variables
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    // A missing secret or unreachable credential store stops us here
    let config = Settings::new()?;
    info!("Configuration loaded successfully: {:?}", config);

    let state = AppState::new(config.clone()).await?;
    state.start_background_tasks();
    let data = web::Data::new(state.clone());

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Serving at {}:{}", config.server.host, config.server.port);

    let cors_config = config.cors.clone();
    let served = HttpServer::new(move || {
        App::new()
            .wrap(cors(&cors_config))
            .wrap_fn(|req, srv| {
                let ip = client_ip(req.request());
                let method = req.method().clone();
                let path = req.path().to_string();
                let query = req.query_string().to_string();
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    info!("{} {} {} {} {}", ip, method, path, query, res.status().as_u16());
                    Ok(res)
                }
            })
            .app_data(data.clone())
            .route("/health", web::get().to(health_check))
            .configure(handlers::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()));

    if let Err(e) = state.shutdown().await {
        warn!("shutdown did not complete cleanly: {}", e);
    }
    info!("login server is down, bye!");
    served
}
