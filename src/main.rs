mod cache;
mod command_line_arguments;
mod config;
mod error;
mod proxy;
mod service;

use crate::command_line_arguments::MaskpxArguments;
use crate::config::loader::spawn_periodic_reload;
use crate::proxy::request_handler::handle_request;
use crate::service::{CONFIG_RELOAD_INTERVAL, KEEP_WARM_INTERVAL, ProxyService};
use anyhow::Result;
use clap::Parser;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use log::{LevelFilter, error, info, trace};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> Result<()> {
    let args = MaskpxArguments::parse();
    pretty_env_logger::env_logger::builder()
        .format_timestamp(None)
        .filter_level(if args.verbose { LevelFilter::Trace } else { LevelFilter::Info })
        .init();

    info!("Starting maskpx");
    trace!("Arguments: {:#?}", args);

    let service = Arc::new(ProxyService::new(args.clone()));
    service.reload_config().await;

    let reload_task = spawn_periodic_reload(service.clone(), CONFIG_RELOAD_INTERVAL);
    let keep_warm_task = args.self_url.is_some().then(|| spawn_keep_warm(service.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let svc = service.clone();
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let remote_addr = conn.remote_addr().ip();
        let svc = svc.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let svc = svc.clone();
                async move { Ok::<_, Infallible>(handle_request(svc, remote_addr, req).await) }
            }))
        }
    });

    let server = hyper::Server::try_bind(&addr)?.serve(make_svc);
    info!("Proxy server running on {addr}");

    let graceful = server.with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    });
    if let Err(e) = graceful.await {
        error!("Server error: {e}");
    }

    reload_task.abort();
    if let Some(task) = keep_warm_task {
        task.abort();
    }
    Ok(())
}

/// Pings our own health endpoint on an interval so free-tier hosts do not
/// put the instance to sleep.
fn spawn_keep_warm(service: Arc<ProxyService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + KEEP_WARM_INTERVAL,
            KEEP_WARM_INTERVAL,
        );
        loop {
            interval.tick().await;
            service.keep_warm_ping().await;
        }
    })
}
