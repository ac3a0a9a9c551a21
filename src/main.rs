use std::convert::Infallible;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notes_api::auth::PasswordHasher;
use notes_api::config::{Cli, Command, InspectCommand, ServerConfig};
use notes_api::http::ApiService;
use notes_api::inspect;
use notes_api::metrics::SharedMetrics;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn setup_tracing(log_level: &str) {
    // RUST_LOG wins over the CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Command::Server(config) => config.log_level.as_str(),
        _ => "info",
    };
    setup_tracing(log_level);

    match cli.command {
        Command::Inspect { store, command } => {
            let store = inspect::open(&store)?;
            match command {
                InspectCommand::ListUsers => {
                    for user in inspect::list_users(store)? {
                        println!("{}\t{}\t{}", user.user_id, user.username, user.email);
                    }
                }
                InspectCommand::NumKeys => {
                    let counts = inspect::num_keys(store)?;
                    println!("Users: {}", counts.users);
                    println!("Sessions: {}", counts.sessions);
                }
                InspectCommand::UserSessions { email } => {
                    match inspect::user_sessions(store, &email)? {
                        Some(count) => println!("Live sessions for {email}: {count}"),
                        None => anyhow::bail!("no user with email {email}"),
                    }
                }
            }
        }
        Command::PruneSessions { store } => {
            let removed = inspect::prune_sessions(inspect::open(&store)?)?;
            println!("Removed {removed} expired sessions");
        }
        Command::Server(config) => run(config)?,
    }
    Ok(())
}

#[tokio::main]
async fn run(args: ServerConfig) -> Result<()> {
    let metrics = SharedMetrics::new().context("failed to register metrics")?;

    let store = inspect::open(&args.store)?;
    let session_config = args.session_config();
    info!(
        engine = %args.store.metadata_db,
        environment = %args.environment,
        session_ttl = args.session_ttl,
        "Credential store opened"
    );

    let service = ApiService::new(
        store,
        session_config,
        PasswordHasher::new(args.bcrypt_cost),
        metrics.clone(),
    );

    run_server(args, service, metrics).await
}

fn metrics_response(
    metrics: &SharedMetrics,
    req: &Request<hyper::body::Incoming>,
) -> Response<Full<Bytes>> {
    let (status, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.encode() {
            Ok(buffer) => (StatusCode::OK, buffer),
            Err(err) => {
                error!("failed to encode metrics: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
            }
        },
        _ => (StatusCode::NOT_FOUND, b"Not Found".to_vec()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if status == StatusCode::OK {
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
    }
    response
}

async fn run_server(args: ServerConfig, service: ApiService, metrics: SharedMetrics) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    let local_addr = listener.local_addr()?;

    let metrics_listener =
        tokio::net::TcpListener::bind((args.metric_host.as_str(), args.metric_port))
            .await
            .with_context(|| format!("failed to bind {}:{}", args.metric_host, args.metric_port))?;
    let metrics_addr = metrics_listener.local_addr()?;
    info!("metrics server is running at http://{metrics_addr}");

    let api_service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
        let service = service.clone();
        async move { service.handle_request(req).await }
    });

    let metrics_service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
        let response = metrics_response(&metrics, &req);
        async move { Ok::<_, Infallible>(response) }
    });

    let http_server = ConnBuilder::new(TokioExecutor::new());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    info!("server is running at http://{local_addr}");

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server
                            .serve_connection(TokioIo::new(socket), api_service.clone());
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        error!("error accepting connection: {err}");
                    }
                }
            }
            res = metrics_listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server
                            .serve_connection(TokioIo::new(socket), metrics_service.clone());
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        error!("error accepting metrics connection: {err}");
                    }
                }
            }
            _ = ctrl_c.as_mut() => {
                break;
            }
        };
    }

    tokio::select! {
        () = graceful.shutdown() => {
            tracing::debug!("Gracefully shutdown!");
        },
        () = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
            tracing::debug!(
                "Waited {}s for graceful shutdown, aborting...",
                SHUTDOWN_TIMEOUT.as_secs()
            );
        }
    }

    info!("server is stopped");
    Ok(())
}
