//! Connects to a running physync-server, builds a small tower of
//! boxes over a floor, starts the simulation and prints the
//! interpolated world a few times a second while nudging the top box.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use physync::{BodyDescriptor, InputAction, MotionType, Shape};
use physync_client::{SyncClient, SyncEvent};

#[derive(Parser)]
#[command(name = "physync-demo")]
#[command(about = "Headless physync demo client")]
struct Args {
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Seconds to watch the room before disconnecting.
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,
}

fn scene() -> Vec<BodyDescriptor> {
    let mut bodies = vec![BodyDescriptor::new(
        "floor",
        Shape::Box {
            half_extents: [20.0, 0.5, 20.0],
        },
    )
    .with_motion_type(MotionType::Static)
    .at([0.0, -0.5, 0.0])];

    for level in 0..4 {
        bodies.push(
            BodyDescriptor::new(
                format!("box-{level}"),
                Shape::Box {
                    half_extents: [0.5, 0.5, 0.5],
                },
            )
            .at([0.0, 0.5 + level as f32 * 1.05, 0.0]),
        );
    }

    bodies.push(BodyDescriptor::new("ball", Shape::Sphere { radius: 0.4 }).at([3.0, 6.0, 0.0]));
    bodies
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("connecting to {}", args.url);
    let (client, mut events) = SyncClient::connect(&args.url).await?;

    client
        .create_room("demo", scene(), Some([0.0, -9.81, 0.0]), Vec::new())
        .await?;
    let info = client.join_room("demo").await?;
    info!(
        "joined as {} ({} bodies in snapshot)",
        info.client_id,
        info.snapshot.bodies.len()
    );

    client.start_simulation().await;

    // Knock the tower over once things are running.
    tokio::time::sleep(Duration::from_secs(1)).await;
    client
        .queue_action(InputAction::ApplyImpulse {
            body_id: "box-3".into(),
            impulse: [4.0, 0.0, 1.5],
        })
        .await;

    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let SyncEvent::CollisionEvents { tick, events } = event {
                for e in events {
                    info!("tick {tick}: {:?} {} <-> {}", e.kind, e.body_a, e.body_b);
                }
            }
        }
    });

    let mut printer = tokio::time::interval(Duration::from_millis(500));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.seconds);
    while tokio::time::Instant::now() < deadline {
        printer.tick().await;
        for (id, state) in client.render_states().await {
            info!(
                "{id}: pos ({:+.2}, {:+.2}, {:+.2})",
                state.position[0], state.position[1], state.position[2]
            );
        }
    }

    let stats = client.stats().await;
    info!(
        "done: {} frames in / {} bytes, {} frames out / {} bytes",
        stats.frames_received, stats.bytes_received, stats.frames_sent, stats.bytes_sent
    );

    client.leave_room().await;
    watcher.abort();
    Ok(())
}
