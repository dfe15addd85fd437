//! Dispatcher and worker pool configuration.

use clap::Args;

/// Configuration for a dispatcher deployment.
///
/// Usable as a plain struct with [`Default`], or flattened into an embedding
/// binary's `clap` parser, where every field can also come from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct DispatcherConfig {
    /// Worker threads for blocking handler methods. Zero disables the pool.
    #[arg(long, env = "NEXUS_WORKER_THREADS", default_value_t = default_worker_threads())]
    pub worker_threads: usize,

    /// Blocking tasks that may wait for a free worker.
    #[arg(long, env = "NEXUS_WORKER_QUEUE_CAPACITY", default_value_t = 1024)]
    pub worker_queue_capacity: usize,

    /// Maximum requests in flight before new requests are shed. Cancel requests
    /// are never shed.
    #[arg(long, env = "NEXUS_MAX_CONCURRENT_REQUESTS", default_value_t = 1000)]
    pub max_concurrent_requests: u32,

    /// Emit logs as JSON lines.
    #[arg(long, env = "NEXUS_JSON_LOGS")]
    pub json_logs: bool,

    /// Log filter directives, used when `RUST_LOG` is unset.
    #[arg(long, env = "NEXUS_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            worker_queue_capacity: 1024,
            max_concurrent_requests: 1000,
            json_logs: false,
            log_filter: "info".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Pool settings, or `None` when no worker threads are configured.
    #[must_use]
    pub fn worker_pool(&self) -> Option<WorkerPoolConfig> {
        (self.worker_threads > 0).then(|| WorkerPoolConfig {
            threads: self.worker_threads,
            queue_capacity: self.worker_queue_capacity,
            ..WorkerPoolConfig::default()
        })
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Sizing of a [`WorkerPool`](crate::executor::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub threads: usize,
    pub queue_capacity: usize,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: default_worker_threads(),
            queue_capacity: 1024,
            thread_name: "nexus-worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        dispatcher: DispatcherConfig,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "nexus",
            "--worker-threads",
            "3",
            "--max-concurrent-requests",
            "10",
            "--json-logs",
        ]);
        assert_eq!(cli.dispatcher.worker_threads, 3);
        assert_eq!(cli.dispatcher.max_concurrent_requests, 10);
        assert!(cli.dispatcher.json_logs);
        assert_eq!(cli.dispatcher.worker_queue_capacity, 1024);
        assert_eq!(cli.dispatcher.log_filter, "info");
    }

    #[test]
    fn zero_threads_disables_pool() {
        let config = DispatcherConfig {
            worker_threads: 0,
            ..DispatcherConfig::default()
        };
        assert!(config.worker_pool().is_none());
    }

    #[test]
    fn pool_config_follows_dispatcher_config() {
        let config = DispatcherConfig {
            worker_threads: 2,
            worker_queue_capacity: 8,
            ..DispatcherConfig::default()
        };
        let pool = config.worker_pool().unwrap();
        assert_eq!(pool.threads, 2);
        assert_eq!(pool.queue_capacity, 8);
        assert_eq!(pool.thread_name, "nexus-worker");
    }
}
