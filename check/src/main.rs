use std::error::Error;
use std::process;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use vmqueue::{AnyQueue, QueueConfig, StoreKind};

/// Sends numbered-byte messages through a queue and verifies what arrives.
#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config")]
    config: Option<String>,
    /// Run N consumers each taking num_runs messages from one publisher.
    #[clap(long)]
    consumers: Option<usize>,
    /// plain | mirrored (basic_queue | vm_queue are accepted too)
    queue_type: Option<StoreKind>,
    num_runs: Option<usize>,
    buffer_size: Option<usize>,
    message_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckConfig {
    queue: QueueConfig,
    num_runs: usize,
    message_size: usize,
    consumers: usize,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            queue: QueueConfig::default(),
            num_runs: 100_000,
            message_size: 64,
            consumers: 1,
        }
    }
}

impl CheckConfig {
    fn load(opts: &Opts) -> Result<CheckConfig, Box<dyn Error>> {
        let mut cfg: CheckConfig = match &opts.config {
            Some(path) => confy::load_path(path)?,
            None => CheckConfig::default(),
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
        if let Some(n) = opts.consumers {
            cfg.consumers = n;
        }
        if cfg.consumers == 0 {
            return Err("at least one consumer is needed".into());
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
    let cfg = CheckConfig::load(&opts)?;
    debug!(?cfg, "loaded check config");

    let queue = Arc::new(AnyQueue::open(&cfg.queue)?);
    let good = if cfg.consumers > 1 {
        stress(&queue, cfg.consumers, cfg.num_runs, cfg.message_size)?
    } else {
        check(&queue, cfg.num_runs, cfg.message_size)?
    };
    println!("success: {}", good);
    if !good {
        process::exit(1);
    }
    Ok(())
}

fn numbered(message_size: usize) -> Vec<u8> {
    (0..message_size).map(|i| i as u8).collect()
}

/// One producer, one consumer; every received byte must match its index.
fn check(queue: &Arc<AnyQueue>, num_runs: usize, message_size: usize) -> Result<bool, Box<dyn Error>> {
    let message = numbered(message_size);

    let consumer = thread::spawn({
        let queue = Arc::clone(queue);
        let expected = message.clone();
        move || -> vmqueue::Result<bool> {
            let mut buff = vec![0u8; message_size];
            let mut good = true;
            for run in 0..num_runs {
                let len = queue.get_into(&mut buff[..])?;
                if buff[..len] != expected[..] {
                    warn!(run, len, "received a corrupted message");
                    good = false;
                }
            }
            Ok(good)
        }
    });

    for _ in 0..num_runs {
        queue.put(&message)?;
    }
    let good = consumer.join().map_err(|_| "consumer thread panicked")??;
    Ok(good)
}

/// One publisher sends `consumers * num_runs` messages, each consumer takes
/// `num_runs` of them. Passes when every message was delivered exactly once.
fn stress(
    queue: &Arc<AnyQueue>,
    consumers: usize,
    num_runs: usize,
    message_size: usize,
) -> Result<bool, Box<dyn Error>> {
    let total = consumers * num_runs;
    let publisher = thread::spawn({
        let queue = Arc::clone(queue);
        let message = numbered(message_size);
        move || -> vmqueue::Result<usize> {
            for _ in 0..total {
                queue.put(&message)?;
            }
            Ok(total)
        }
    });

    let handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = Arc::clone(queue);
            let expected = numbered(message_size);
            thread::spawn(move || -> vmqueue::Result<(usize, usize)> {
                let mut buff = vec![0u8; message_size];
                let (mut count, mut corrupt) = (0usize, 0usize);
                for _ in 0..num_runs {
                    let len = queue.get_into(&mut buff[..])?;
                    if buff[..len] != expected[..] {
                        corrupt += 1;
                    }
                    count += 1;
                }
                Ok((count, corrupt))
            })
        })
        .collect();

    let sent = publisher.join().map_err(|_| "publisher thread panicked")??;
    println!("publisher sent {} messages", sent);

    let mut received = 0usize;
    let mut good = true;
    for (i, handle) in handles.into_iter().enumerate() {
        let (count, corrupt) = handle.join().map_err(|_| "consumer thread panicked")??;
        println!("consumer {} received {} messages", i, count);
        received += count;
        good &= corrupt == 0;
    }

    let stats = queue.stats()?;
    info!(sent, received, head_seq = stats.head_seq, "stress run finished");
    Ok(good && sent == received && stats.head_seq == total as u64)
}
