//! `mazebot` – robot-side runtime with a TCP host link.
//!
//! 1. Loads `~/.mazebot/config.toml` (writing the defaults on first run).
//! 2. Listens on `link_addr` for the host.  Bytes use the serial link
//!    framing (byte stuffing, checksums, `+` delimiter), so a serial-to-TCP
//!    bridge can sit between the host tool and this process.
//! 3. Runs the control loop every `control_period_ms` until **Ctrl-C**, then
//!    stops the wheels.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use colored::Colorize;
use mazebot_hal::LoggingDrive;
use mazebot_middleware::{
    ChannelRouter, ChannelTransport, EventBus, LinkDecoder, Topic, encode_link_frame,
};
use mazebot_runtime::{Controller, init_tracing};
use mazebot_types::EventPayload;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, trace, warn};

/// Frames buffered for the host writer before new ones are dropped.
const OUTBOUND_QUEUE: usize = 256;
/// A host that does not take a frame within this long is disconnected.
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Write half of the connected host, if any.
type HostWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

fn main() {
    let _guard = init_tracing("mazebot");
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start runtime".red(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, shutdown)) {
        eprintln!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ Robot stopped.".green());
}

async fn run(cfg: config::Config, shutdown: Arc<AtomicBool>) -> Result<(), String> {
    let (transport, outbound) = ChannelTransport::new(OUTBOUND_QUEUE);
    let mut controller = Controller::new(
        cfg.controller_config(),
        Arc::new(transport.clone()),
        Box::new(LoggingDrive::new()),
    )
    .map_err(|e| format!("Failed to build controller: {e}"))?;

    let listener = TcpListener::bind(&cfg.link_addr)
        .await
        .map_err(|e| format!("Failed to listen on {}: {}", cfg.link_addr, e))?;
    println!("  Host link listening on {}", cfg.link_addr.bold());
    info!(addr = %cfg.link_addr, "host link listening");

    let writer: HostWriter = Arc::new(Mutex::new(None));
    let link_errors = Arc::new(AtomicU64::new(0));
    tokio::spawn(write_outbound(outbound, Arc::clone(&writer)));
    tokio::spawn(watch_alerts(controller.bus()));
    if tracing::enabled!(tracing::Level::TRACE) {
        tokio::spawn(watch_frames(controller.bus()));
    }
    tokio::spawn(accept_hosts(
        listener,
        controller.router(),
        Arc::clone(&writer),
        Arc::clone(&link_errors),
    ));

    let mut interval = tokio::time::interval(Duration::from_millis(cfg.control_period_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;
        controller.tick();
    }

    controller.halt();
    let counters = controller.router().counters();
    info!(
        delivered = counters.delivered,
        decode_errors = counters.decode_errors,
        sent = counters.sent,
        link_errors = link_errors.load(Ordering::Relaxed),
        dropped_frames = transport.dropped(),
        "shutting down"
    );
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Host link
// ────────────────────────────────────────────────────────────────────────────

/// Serve one host at a time; a new connection replaces the previous writer.
async fn accept_hosts(
    listener: TcpListener,
    router: Arc<ChannelRouter>,
    writer: HostWriter,
    link_errors: Arc<AtomicU64>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        info!(%peer, "host connected");
        let (mut reader, write_half) = stream.into_split();
        *writer.lock().await = Some(write_half);

        let router = Arc::clone(&router);
        let link_errors = Arc::clone(&link_errors);
        tokio::spawn(async move {
            let mut decoder = LinkDecoder::new();
            let mut buf = [0u8; 512];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(%peer, error = %e, "host read failed");
                        break;
                    }
                };
                for result in decoder.feed(&buf[..n]) {
                    match result {
                        // Errors are counted and logged by the router.
                        Ok(frame) => {
                            let _ = router.dispatch_frame(&frame);
                        }
                        Err(e) => {
                            link_errors.fetch_add(1, Ordering::Relaxed);
                            debug!(%peer, error = %e, "link frame dropped");
                        }
                    }
                }
            }
            info!(%peer, "host disconnected");
        });
    }
}

/// Frame and write every outbound packet; dropped while no host is connected.
async fn write_outbound(mut outbound: mpsc::Receiver<Vec<u8>>, writer: HostWriter) {
    while let Some(frame) = outbound.recv().await {
        let bytes = encode_link_frame(&frame);
        let mut guard = writer.lock().await;
        let Some(stream) = guard.as_mut() else {
            continue;
        };
        match tokio::time::timeout(WRITE_TIMEOUT, stream.write_all(&bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "host write failed, dropping connection");
                *guard = None;
            }
            Err(_) => {
                warn!(
                    timeout_ms = WRITE_TIMEOUT.as_millis() as u64,
                    "host stalled, dropping connection"
                );
                *guard = None;
            }
        }
    }
}

/// Log follower transitions and faults published by the controller.
async fn watch_alerts(bus: EventBus) {
    let mut alerts = bus.subscribe_to(Topic::Alerts);
    loop {
        match alerts.recv().await {
            Ok(event) => match event.payload {
                EventPayload::FollowerTransition { from, to } => {
                    info!(?from, ?to, "follower state changed");
                }
                EventPayload::Fault { component, message } => {
                    error!(%component, %message, "fault");
                    println!("{} {}: {}", "✗".red().bold(), component, message);
                }
                EventPayload::Frame { .. } => {}
            },
            Err(RecvError::Lagged(n)) => warn!(missed = n, "alert monitor lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Trace every frame the host sends, as mirrored by the router.
async fn watch_frames(bus: EventBus) {
    let mut frames = bus.subscribe_to(Topic::InboundFrames);
    loop {
        match frames.recv().await {
            Ok(event) => {
                if let EventPayload::Frame { direction, bytes } = event.payload {
                    trace!(
                        ?direction,
                        channel = bytes.first().copied(),
                        len = bytes.len(),
                        "frame in"
                    );
                }
            }
            Err(RecvError::Lagged(n)) => debug!(missed = n, "frame monitor lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Banner
// ────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __  ___              __        __ "#.bold().cyan());
    println!("{}", r#"  /  |/  /__ ____ ___  / /  ___  / /_"#.bold().cyan());
    println!("{}", r#" / /|_/ / _ `/_ // -_)/ _ \/ _ \/ __/"#.bold().cyan());
    println!("{}", r#"/_/  /_/\_,_//__/\__//_.__/\___/\__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "mazebot".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Maze robot control loop");
    println!();
}
