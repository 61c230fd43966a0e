use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use emu_bridge_core::logging::parse_level;
use emu_bridge_core::{server, Bridge, BridgeConfig, HeadlessCore, HookDispatcher};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Startup filter directive: a parseable `RUST_LOG` wins over the configured
/// level. LOG_LEVEL replaces either at runtime.
fn startup_directive(rust_log: Option<&str>, level: &str) -> String {
    let level = parse_level(level).unwrap_or("info");
    match rust_log.map(str::trim) {
        Some(raw) if !raw.is_empty() && EnvFilter::try_new(raw).is_ok() => raw.to_string(),
        _ => level.to_string(),
    }
}

fn init_tracing(directive: &str) -> FilterHandle {
    let (filter, handle) = reload::Layer::new(EnvFilter::new(directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
    handle
}

fn spawn_emulation(core: Arc<HeadlessCore>, stop: Arc<AtomicBool>) -> anyhow::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("emulation".into())
        .spawn(move || {
            info!("emulation thread started");
            while !stop.load(Ordering::Acquire) {
                core.tick();
                thread::sleep(FRAME_INTERVAL);
            }
            info!("emulation thread stopped");
        })
        .context("spawning emulation thread")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::from_env();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = startup_directive(rust_log.as_deref(), &config.log_level);
    let filter = init_tracing(&directive);

    let hooks = Arc::new(HookDispatcher::new());
    let core = Arc::new(HeadlessCore::new(config.state_dir(), hooks.clone()));
    core.load_demo();

    let bridge = Bridge::new(config, core.clone(), hooks);
    bridge.log_level().install(directive, move |level| {
        filter
            .reload(EnvFilter::new(level))
            .map_err(|e| e.to_string())
    });

    let stop = Arc::new(AtomicBool::new(false));
    let emulation = spawn_emulation(core, stop.clone())?;

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(server::run(bridge.clone(), shutdown_rx));
    info!(
        socket = %bridge.config().socket_path().display(),
        "emulator bridge running, Ctrl-C to stop"
    );

    let served = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("interrupt received, shutting down");
            let _ = shutdown.send(true);
            (&mut server).await
        }
        finished = &mut server => finished,
    };

    stop.store(true, Ordering::Release);
    emulation
        .join()
        .map_err(|_| anyhow!("emulation thread panicked"))?;
    bridge.teardown();

    served
        .context("server task panicked")?
        .context("bridge server failed")?;
    Ok(())
}
