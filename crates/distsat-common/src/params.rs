use clap::Parser;

fn default_scheduling_tick_ms() -> u64 {
    200
}

fn default_global_capacity() -> u32 {
    1
}

fn default_growth_period_secs() -> f64 {
    5.0
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Worker daemon configuration, populated from CLI flags with environment
/// fallbacks, following the same `#[arg(long, env = "...")]` shape the
/// teacher's interactive CLI uses for its own settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "distsat-worker", version, about = "Distributed SAT solving platform worker")]
pub struct Params {
    /// Total number of ranks in the cluster. With no real MPI/TCP transport
    /// in scope, the worker binary hosts all `world_size` ranks itself,
    /// wired together with the in-process loopback transport.
    #[arg(long, env = "DISTSAT_WORLD_SIZE")]
    pub world_size: u32,

    /// Cluster-wide volume cap the Global Balancer apportions across jobs.
    #[arg(long, env = "DISTSAT_GLOBAL_CAPACITY", default_value_t = default_global_capacity())]
    pub global_capacity: u32,

    /// How often the run loop advances job temperatures and reassesses demand, in milliseconds.
    #[arg(long = "scheduling-tick-ms", env = "DISTSAT_SCHEDULING_TICK_MS", default_value_t = default_scheduling_tick_ms())]
    pub scheduling_tick_ms: u64,

    /// Default growth period (seconds) applied to a submitted job that
    /// doesn't specify its own in the ingress document.
    #[arg(long, env = "DISTSAT_DEFAULT_GROWTH_PERIOD_SECS", default_value_t = default_growth_period_secs())]
    pub default_growth_period_secs: f64,

    /// Path to the native solver binary spawned per accepted job.
    #[arg(long, env = "DISTSAT_SOLVER_PROGRAM")]
    pub solver_program: String,

    /// Extra arguments passed through to the solver binary, in order.
    #[arg(long = "solver-arg", env = "DISTSAT_SOLVER_ARGS", value_delimiter = ',', allow_hyphen_values = true)]
    pub solver_args: Vec<String>,

    /// Path to a JSON job submission document to load at startup. With no
    /// file-watcher in scope, this is the one-shot substitute for it.
    #[arg(long, env = "DISTSAT_SUBMIT_JOB")]
    pub submit_job: Option<String>,

    /// `tracing-subscriber` env-filter directive string.
    #[arg(long, env = "DISTSAT_LOG", default_value_t = default_log_filter())]
    pub log_filter: String,
}

impl Params {
    /// The scheduling tick as a `Duration`.
    pub fn scheduling_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduling_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_required_flags() {
        let params = Params::parse_from([
            "distsat-worker",
            "--world-size",
            "4",
            "--solver-program",
            "/usr/local/bin/distsat-solve",
        ]);
        assert_eq!(params.world_size, 4);
        assert_eq!(params.global_capacity, 1);
        assert_eq!(params.scheduling_tick(), std::time::Duration::from_millis(200));
        assert!(params.solver_args.is_empty());
    }

    #[test]
    fn splits_comma_delimited_solver_args() {
        let params = Params::parse_from([
            "distsat-worker",
            "--world-size",
            "4",
            "--solver-program",
            "/usr/local/bin/distsat-solve",
            "--solver-arg",
            "--threads=2,--quiet",
        ]);
        assert_eq!(params.solver_args, vec!["--threads=2", "--quiet"]);
    }
}
