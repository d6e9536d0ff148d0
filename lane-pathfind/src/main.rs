use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lane_pathfind::network::{
    LaneGraph, LanePosition, LaneType, Point, RoadNetwork, RoadNetworkBuilder, SegmentId,
    SegmentSpec, SegmentSweep, VehicleType,
};
use lane_pathfind::pathfind::{PathFindConfig, PathManager, PathRequest, PathStatus, RequestFlags};

/// Traffic recorded per lane for each finished path.
const CAR_TRAFFIC: u32 = 5;
const HEAVY_TRAFFIC: u32 = 10;

/// Outer forward car lane on a two-lane road with sidewalks.
const DRIVING_LANE: u8 = 4;

#[derive(Parser)]
#[command(name = "lane-pathfind")]
#[command(about = "Run path requests over a generated street grid", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Nodes along each side of the grid
    #[arg(long, default_value = "8")]
    grid: usize,

    /// Requests per round
    #[arg(short, long, default_value = "200")]
    requests: usize,

    /// Rounds of requests, with a density refresh between rounds
    #[arg(long, default_value = "3")]
    rounds: usize,

    /// Override the configured worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Seed for picking request endpoints
    #[arg(long, default_value = "1")]
    seed: u64,
}

/// A square grid of two-way roads with sidewalks, 120 apart.
fn build_grid(size: usize) -> (RoadNetwork, Vec<SegmentId>) {
    let mut builder = RoadNetworkBuilder::new();
    let mut nodes = Vec::with_capacity(size * size);
    for j in 0..size {
        for i in 0..size {
            nodes.push(builder.add_node(Point::flat(i as f32 * 120.0, j as f32 * 120.0)));
        }
    }
    let road = SegmentSpec::road(2, 13.9).with_sidewalks();
    let mut segments = Vec::new();
    for j in 0..size {
        for i in 0..size {
            let here = nodes[j * size + i];
            let links = [(i + 1 < size, j * size + i + 1), (j + 1 < size, (j + 1) * size + i)];
            for (exists, other) in links {
                if !exists {
                    continue;
                }
                match builder.add_segment(here, nodes[other], &road) {
                    Ok(id) => segments.push(id),
                    Err(err) => warn!(error = %err, "skipping grid segment"),
                }
            }
        }
    }
    (builder.build(), segments)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PathFindConfig::from_json_file(path)?,
        None => PathFindConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    let sweep = SegmentSweep::new(config.sim_accuracy);

    let size = cli.grid.max(2);
    let (network, segments) = build_grid(size);
    let graph = Arc::new(network);
    info!(
        nodes = graph.nodes().len(),
        segments = segments.len(),
        lanes = graph.lane_count(),
        "grid built"
    );
    let max_length = size as f32 * 120.0 * 4.0;

    let mut manager = PathManager::new(Arc::clone(&graph), config)?;
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);

    for round in 0..cli.rounds {
        let started = Instant::now();
        let mut units = Vec::with_capacity(cli.requests);
        for n in 0..cli.requests {
            let from = segments[rng.gen_range(0..segments.len())];
            let to = segments[rng.gen_range(0..segments.len())];
            let mut request = PathRequest::new(
                LanePosition::new(from, DRIVING_LANE, 0),
                LanePosition::new(to, DRIVING_LANE, 255),
                LaneType::VEHICLE,
                VehicleType::CAR,
                max_length,
            );
            if n % 10 == 0 {
                request = request.with_flags(RequestFlags::HEAVY_VEHICLE);
            }
            let heavy = request.flags.contains(RequestFlags::HEAVY_VEHICLE);
            match manager.create_path(request) {
                Ok(unit) => units.push((unit, heavy)),
                Err(err) => warn!(error = %err, "request rejected"),
            }
        }
        manager.wait_for_all();

        let (mut ready, mut failed, mut positions) = (0usize, 0usize, 0usize);
        for (unit, heavy) in units {
            match manager.status(unit) {
                Some(PathStatus::Ready) => {
                    ready += 1;
                    let path = manager.path_positions(unit).unwrap_or_default();
                    positions += path.len();
                    let amount = if heavy { HEAVY_TRAFFIC } else { CAR_TRAFFIC };
                    for position in path {
                        if let Some(lane) = graph.lane_id(position) {
                            graph.density().add_traffic(lane, amount);
                        }
                    }
                }
                _ => failed += 1,
            }
            manager.release_path(unit);
        }

        let refreshed: usize = (0..sweep.period())
            .map(|tick| graph.update_densities(sweep, tick))
            .sum();
        info!(
            round,
            ready,
            failed,
            positions,
            refreshed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "round finished"
        );
    }

    manager.shutdown();
    Ok(())
}
