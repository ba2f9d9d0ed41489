use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{self, Parser};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use vmqueue::{AnyQueue, QueueConfig, StoreKind};

/// Measures the mean time per put while one consumer thread drains the queue.
#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config")]
    config: Option<String>,
    /// plain | mirrored (basic_queue | vm_queue are accepted too)
    queue_type: Option<StoreKind>,
    num_runs: Option<usize>,
    buffer_size: Option<usize>,
    message_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchConfig {
    queue: QueueConfig,
    num_runs: usize,
    message_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            queue: QueueConfig::default(),
            num_runs: 1_000_000,
            message_size: 64,
        }
    }
}

impl BenchConfig {
    fn load(opts: &Opts) -> Result<BenchConfig, Box<dyn Error>> {
        let mut cfg: BenchConfig = match &opts.config {
            Some(path) => confy::load_path(path)?,
            None => BenchConfig::default(),
        };
        if let Some(kind) = opts.queue_type {
            cfg.queue.strategy = kind;
        }
        if let Some(n) = opts.num_runs {
            cfg.num_runs = n;
        }
        if let Some(size) = opts.buffer_size {
            cfg.queue.capacity = size;
        }
        if let Some(size) = opts.message_size {
            cfg.message_size = size;
        }
        if cfg.num_runs == 0 {
            return Err("num_runs must be at least 1".into());
        }
        Ok(cfg)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let opts: Opts = Opts::parse();
    let cfg = BenchConfig::load(&opts)?;
    debug!(?cfg, "loaded benchmark config");

    let queue = Arc::new(AnyQueue::open(&cfg.queue)?);
    let elapsed = run(&queue, cfg.num_runs, cfg.message_size)?;
    let per_put = elapsed.as_nanos() as f64 / 1_000f64 / cfg.num_runs as f64;
    info!(
        strategy = %queue.kind(),
        capacity = queue.capacity(),
        num_runs = cfg.num_runs,
        message_size = cfg.message_size,
        total = ?elapsed,
        "benchmark finished"
    );
    println!("{}", per_put);
    Ok(())
}

/// Sends `num_runs` messages of `message_size` bytes and returns the time
/// the producer side took.
fn run(queue: &Arc<AnyQueue>, num_runs: usize, message_size: usize) -> Result<Duration, Box<dyn Error>> {
    let message: Vec<u8> = (0..message_size).map(|i| i as u8).collect();

    let consumer = thread::spawn({
        let queue = Arc::clone(queue);
        move || -> vmqueue::Result<()> {
            let mut buff = vec![0u8; message_size];
            for _ in 0..num_runs {
                queue.get_into(&mut buff[..])?;
            }
            Ok(())
        }
    });

    let start = Instant::now();
    for _ in 0..num_runs {
        queue.put(&message)?;
    }
    let elapsed = start.elapsed();

    consumer.join().map_err(|_| "consumer thread panicked")??;
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    fn opts(config: Option<String>) -> Opts {
        Opts {
            config,
            queue_type: None,
            num_runs: None,
            buffer_size: None,
            message_size: None,
        }
    }

    #[test]
    fn config_file_then_flags() -> Result<(), Box<dyn Error>> {
        let temp_dir = Builder::new().prefix("vmqueue_bench").tempdir()?;
        let path = temp_dir.path().join("bench.toml");
        let mut file = File::create(&path)?;
        file.write_all(
            b"num_runs = 10\n\
              message_size = 8\n\
              [queue]\n\
              strategy = \"basic_queue\"\n\
              capacity = 256\n",
        )?;

        let mut opts = opts(Some(path.to_string_lossy().into_owned()));
        let cfg = BenchConfig::load(&opts)?;
        assert_eq!(cfg.queue.strategy, StoreKind::Plain);
        assert_eq!(cfg.queue.capacity, 256);
        assert_eq!((cfg.num_runs, cfg.message_size), (10, 8));

        opts.num_runs = Some(3);
        opts.buffer_size = Some(128);
        let cfg = BenchConfig::load(&opts)?;
        assert_eq!(cfg.num_runs, 3);
        assert_eq!(cfg.queue.capacity, 128);
        Ok(())
    }

    #[test]
    fn zero_runs_is_rejected() {
        let mut opts = opts(None);
        opts.num_runs = Some(0);
        assert!(BenchConfig::load(&opts).is_err());
    }

    #[test]
    fn run_moves_every_message() -> Result<(), Box<dyn Error>> {
        let queue = Arc::new(AnyQueue::open(&QueueConfig {
            strategy: StoreKind::Plain,
            capacity: 512,
        })?);
        run(&queue, 1_000, 40)?;
        let stats = queue.stats()?;
        assert_eq!(stats.head_seq, 1_000);
        assert_eq!(stats.occupancy, 0);
        Ok(())
    }
}
