use std::time::Duration;

use clap::Parser;
use vmi_disruption_budget::{controller_manager::ControllerConfig, queue::Backoff};

#[derive(Parser, Debug)]
pub struct Opts {
    /// The number of keys to reconcile concurrently.
    /// Defaults to the number of CPUs the machine has, as reported by `num_cpus`.
    #[clap(long, short)]
    pub workers: Option<usize>,

    /// Only watch this namespace, all namespaces when unset.
    #[clap(long, short)]
    pub namespace: Option<String>,

    /// Reporting component recorded on emitted events.
    #[clap(long, default_value = "disruptionbudget-controller")]
    pub controller_name: String,

    /// Delay before the first retry of a failed key.
    #[clap(long, default_value = "5")]
    pub requeue_base_delay_ms: u64,

    /// Upper bound on the retry delay of a failing key.
    #[clap(long, default_value = "300")]
    pub requeue_max_delay_secs: u64,

    /// Disable coloured log output.
    #[clap(long)]
    pub no_ansi: bool,
}

impl Opts {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers.unwrap_or_else(num_cpus::get),
            namespace: self.namespace.clone(),
            controller_name: self.controller_name.clone(),
            backoff: Backoff {
                base: Duration::from_millis(self.requeue_base_delay_ms),
                max: Duration::from_secs(self.requeue_max_delay_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_controller_defaults() {
        let opts = Opts::parse_from(["vmi-disruption-budget", "--workers", "2"]);
        let config = opts.controller_config();
        assert_eq!(config.workers, 2);
        assert_eq!(config.namespace, None);
        assert_eq!(config.controller_name, "disruptionbudget-controller");
        assert_eq!(config.backoff, Backoff::default());
    }

    #[test]
    fn namespace_and_backoff_are_configurable() {
        let opts = Opts::parse_from([
            "vmi-disruption-budget",
            "--namespace",
            "vms",
            "--requeue-base-delay-ms",
            "100",
            "--requeue-max-delay-secs",
            "10",
        ]);
        let config = opts.controller_config();
        assert_eq!(config.namespace.as_deref(), Some("vms"));
        assert_eq!(config.backoff.base, Duration::from_millis(100));
        assert_eq!(config.backoff.max, Duration::from_secs(10));
    }
}
