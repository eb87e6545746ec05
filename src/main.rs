use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use lootledger::config::Config;
use lootledger::logging::{log, obj, v_str, Domain, Level};
use lootledger::service::Runtime;
use lootledger::{http, notify};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_addr))?;

    let (runtime, events_rx) = Runtime::bootstrap(&cfg).context("bootstrap failed")?;
    log(
        Level::Info,
        Domain::System,
        "started",
        obj(&[
            ("addr", v_str(&cfg.bind_addr)),
            ("data_dir", v_str(&cfg.data_dir.display().to_string())),
            ("scope", v_str(&runtime.current_scope())),
        ]),
    );

    let notifier = notify::build(cfg.notify_webhook_url.as_deref());
    let notifier_task = tokio::spawn(notify::run_notifier(events_rx, notifier));
    let maintenance = runtime.spawn_maintenance(&cfg);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        log(Level::Info, Domain::System, "shutdown_requested", obj(&[]));
    };
    http::serve(addr, runtime.clone(), shutdown).await?;

    for task in maintenance {
        task.abort();
    }
    match runtime.snapshot().await {
        Ok(digest) => log(
            Level::Info,
            Domain::System,
            "final_snapshot",
            obj(&[("digest", v_str(&digest))]),
        ),
        Err(err) => log(
            Level::Error,
            Domain::System,
            "final_snapshot_failed",
            obj(&[("error", v_str(&err.to_string()))]),
        ),
    }

    // the notifier exits once every sender is dropped
    drop(runtime);
    let delivered = match tokio::time::timeout(Duration::from_secs(5), notifier_task).await {
        Ok(Ok(n)) => n,
        _ => 0,
    };
    log(
        Level::Info,
        Domain::System,
        "stopped",
        obj(&[("notifications", serde_json::json!(delivered))]),
    );
    Ok(())
}
