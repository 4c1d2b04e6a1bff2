use heatcache::prelude::*;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let params = SolverParameters {
        width: 100,
        height: 100,
        cfl: 0.25,
        td: 0.5,
        boundary: Boundary { left: 100.0, right: 20.0, top: 20.0, bottom: 20.0 },
    };
    let store = Arc::new(Hdf5Store::new("data/heat_cache", params.width, params.height).unwrap());

    let mut desc = SchedulerDescriptor::new(HeatSolver::new(params).unwrap(), store);
    desc.checkpoint_interval = 50;
    let cache = CacheFront::new(
        JobScheduler::new(desc).unwrap(),
        CacheDescriptor {
            max_pending_jobs: 256,
            max_write_backlog: 16,
            prefetch_window: 4,
        },
    )
    .unwrap();
    cache.set_info("consumers", 1);

    println!(
        "\n-- General Simulation Info --\n\
        plate:        {} x {}\n\
        coefficient:  {:<9.3e}\n\
        Δt:           {:<9.3e}\n",
        params.width,
        params.height,
        params.coefficient(),
        cache.scheduler().timestep(),
    );

    println!("-- Part 1: compute in the foreground --");
    let _ = cache.request_range(&RangeRequest::iterations(0, 200, 20)).unwrap();
    let report = cache.drive(true).unwrap();
    println!("{:?}", report);

    println!("-- Part 2: poll a background run --");
    cache.start().unwrap();
    let dt = cache.scheduler().timestep();
    let request = RangeRequest::time(250.0*dt, 400.0*dt, 50.0*dt);
    let admission = cache.request_range(&request).unwrap();
    println!("{:?}", admission);
    while cache.test(400) != JobStatus::Exists {
        std::thread::sleep(Duration::from_millis(10));
    }
    cache.stop().unwrap();

    let grid = cache.read(400).unwrap();
    let (cx, cy) = (params.width as usize / 2, params.height as usize / 2);
    println!("center temperature at iteration 400: {:.4}", grid.at(cx, cy));

    println!("-- Part 3: replay from the last checkpoint --");
    cache.restart(400).unwrap();
    let _ = cache.request_range(&RangeRequest::iterations(420, 420, 1)).unwrap();
    cache.drive(true).unwrap();

    println!("-- Part 4: a reader stepping through frames --");
    for key in [420, 425, 430, 435] {
        let _ = cache.request_range(&RangeRequest::iterations(key as i64, key as i64, 1)).unwrap();
        if let Some(admission) = cache.access("viewer", key).unwrap() {
            println!("prefetch: {:?}", admission);
        }
        cache.drive(false).unwrap();
        let grid = cache.read(key).unwrap();
        println!("frame {}: center {:.4}", key, grid.at(cx, cy));
    }
    println!("{:?}", cache.stats());
}
