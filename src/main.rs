//! LED Strip Animation Server
//!
//! Runs a web server that accepts animation scripts and plays them on an
//! addressable LED strip. Any device on the LAN can POST frames with
//! `curl`; overlapping animations pre-empt each other pixel by pixel.
//!
//! ## Architecture
//! - **Engine** (async loop on the main task): owns the frame buffer, the
//!   animations and the strip driver
//! - **HTTP server** (axum): validates requests, sends commands via channel
//!
//! Both run on a single-threaded tokio runtime. On Ctrl+C or SIGTERM the
//! server stops accepting requests, then the engine halts every animation
//! and blanks the strip.
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/led-strip-animator --num-leds 60 --port 8080
//! curl -X POST localhost:8080/animate+repeat \
//!   -d '[{"duration":500,"pixels":{"0":16711680}},{"duration":500,"pixels":{"0":0}}]'
//! ```

use clap::Parser;
use led_strip_animator::StripConfig;
use led_strip_animator::driver::create_driver;
use led_strip_animator::engine::{Engine, EngineHandle};
use led_strip_animator::server::{self, AppState};
use tracing_subscriber::EnvFilter;

/// LED Strip Animation Server
#[derive(Parser)]
#[command(name = "led-strip-animator")]
#[command(about = "HTTP API server that plays timed animations on an LED strip")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Number of LEDs on the strip
    #[arg(long, default_value = "12")]
    num_leds: usize,

    /// GPIO pin driving the strip's data line
    #[arg(long, default_value = "18")]
    gpio_pin: i32,

    /// Hardware brightness (0-255)
    #[arg(long, default_value = "255")]
    brightness: u8,

    /// Log frames instead of driving the strip
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG overrides the default level, e.g. RUST_LOG=led_strip_animator=debug
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let strip = StripConfig {
        gpio_pin: args.gpio_pin,
        brightness: args.brightness,
        ..StripConfig::new(args.num_leds)
    };

    tracing::info!("LED Strip Animation Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Strip: {} LEDs on GPIO {}", strip.num_leds, strip.gpio_pin);
    tracing::info!("Port: {}", args.port);

    let driver = create_driver(strip, args.dry_run)?;
    let (engine, handle) = Engine::new(strip, driver);

    let app = server::create_router(AppState {
        engine: handle.clone(),
        strip,
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", args.port);

    // Stop the engine first: streaming clients disconnect once the buffer
    // feed closes, which lets the graceful shutdown finish.
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        stop_engine(&handle).await;
    });

    // The engine isn't Send (the hardware driver holds raw pointers), so it
    // runs on this task alongside the server instead of being spawned.
    let ((), served) = tokio::join!(engine.run(), serve.into_future());
    served?;

    tracing::info!("Shut down cleanly.");
    Ok(())
}

async fn stop_engine(handle: &EngineHandle) {
    if handle.shutdown().await.is_err() {
        tracing::warn!("Engine already stopped");
    }
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
