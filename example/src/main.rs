// Compile a small test drawing and stream it to a running controller.
// Start the controller first: cargo run -p controller

use tracing::info;

use ssg::compiler::{compile, CompilerConfig};
use ssg::config::SoftLimits;
use ssg::drawing::{Drawing, Polyline};
use ssg::drivers::{PlotterDriver, PlotterDriverConfig, StreamEvent};
use ssg::{Position, StreamError};

fn test_drawing() -> Drawing {
    // A square with a diagonal through it, drawn away from the homing
    // corner so every coordinate is positive.
    let square = Polyline::new(
        vec![
            Position::new(20.0, 20.0),
            Position::new(60.0, 20.0),
            Position::new(60.0, 60.0),
            Position::new(20.0, 60.0),
            Position::new(20.0, 20.0),
        ],
        60,
        600.0,
    );
    let diagonal = Polyline::new(
        vec![Position::new(20.0, 20.0), Position::new(60.0, 60.0)],
        40,
        900.0,
    );
    Drawing {
        plate_radius_mm: 110.0,
        soft_limits: SoftLimits::default(),
        rapid_feed: 3000.0,
        polylines: vec![square, diagonal],
    }
}

#[tokio::main]
async fn main() -> Result<(), StreamError> {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("SSG_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("SSG_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9800);

    let job = compile(
        &test_drawing(),
        &CompilerConfig {
            two_opt: true,
            park: true,
            report_position: true,
            ..Default::default()
        },
    )
    .expect("test drawing compiles");
    info!(
        commands = job.stats.commands,
        draw_mm = job.stats.draw_length_mm,
        travel_mm = job.stats.travel_length_mm,
        estimated_secs = job.stats.estimated_secs,
        "compiled job"
    );

    let config = PlotterDriverConfig::new(addr, port);
    let mut driver = PlotterDriver::connect(config).await?;
    info!("connected to controller");

    let mut events = driver.events.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                StreamEvent::Progress(p) => {
                    info!(
                        sent = p.sent,
                        acked = p.acked,
                        total = p.total,
                        retries = p.retries,
                        "progress"
                    );
                }
                StreamEvent::Telemetry(frame) => {
                    info!(
                        x = frame.pos.x,
                        y = frame.pos.y,
                        flow = frame.flow,
                        q = frame.q,
                        state = %frame.state,
                        "telemetry"
                    );
                }
                StreamEvent::DeviceError { seq, code } => {
                    info!(?seq, %code, "device error");
                }
                StreamEvent::Busy { queue_depth } => {
                    info!(queue_depth, "controller busy, backing off");
                }
            }
        }
    });

    let stats = driver.stream(&job.lines).await?;
    info!(
        sent = stats.sent,
        acked = stats.acked,
        retries = stats.retries,
        elapsed_secs = stats.elapsed.as_secs_f64(),
        "stream complete"
    );

    driver.close().await;
    watcher.abort();
    Ok(())
}
