//! Binding and running the HTTP server.

use std::net::{IpAddr, SocketAddr};

use axum::Router;
use tokio::net::{TcpListener, ToSocketAddrs};

/// Bind `addr` and serve `router` until Ctrl+C or SIGTERM. Handlers and
/// middleware can read the peer address through `ConnectInfo<SocketAddr>`.
///
/// In-flight requests, including open progress streams, are allowed to
/// finish before the future resolves.
pub async fn serve<A: ToSocketAddrs>(addr: A, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tracing::info!(port = local.port(), "listening");
    for url in listener_urls(local, &interface_ips()) {
        tracing::info!("  {url}");
    }

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn interface_ips() -> Vec<IpAddr> {
    if_addrs::get_if_addrs()
        .into_iter()
        .flatten()
        .map(|iface| iface.ip())
        .collect()
}

/// URLs a client could use to reach a listener on `local`. Wildcard binds
/// expand to every interface address of the same family.
fn listener_urls(local: SocketAddr, interfaces: &[IpAddr]) -> Vec<String> {
    let port = local.port();
    let ips: Vec<IpAddr> = if local.ip().is_unspecified() {
        interfaces
            .iter()
            .copied()
            .filter(|ip| ip.is_ipv6() == local.is_ipv6())
            .collect()
    } else {
        vec![local.ip()]
    };

    ips.into_iter()
        .map(|ip| match ip {
            ip if ip.is_loopback() => format!("local:   http://localhost:{port}"),
            IpAddr::V4(ip) => format!("network: http://{ip}:{port}"),
            IpAddr::V6(ip) => format!("network: http://[{ip}]:{port}"),
        })
        .collect()
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
}
