use clap::Parser;
use utils::version;

#[derive(Parser)]
#[command(about = "cluster-level greedy job scheduler", version = &**version::VERSION)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "SCHEDULER_LISTEN_ADDR",
        default_value = "0.0.0.0:10020",
        help = "TCP address for job submissions and node status reports"
    )]
    pub listen_addr: String,

    #[arg(long, default_value_t = 1000, help = "dispatch interval in ms")]
    pub dispatch_interval_ms: u64,

    #[arg(
        short = 'b',
        long,
        default_value_t = 50,
        help = "contention history size per node"
    )]
    pub metric_buf_size: usize,
}
