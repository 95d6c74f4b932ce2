// Hosts one task behind the request/response protocol. The parent process owns the socket
// and passes its name through `--socket-name`.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use lrl_core::{
    envs::ChainTask,
    task_pool::{SocketChannel, serve},
};
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum TaskFamily {
    Chain,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    socket_name: String,

    #[arg(long, value_enum, default_value = "chain")]
    task: TaskFamily,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, default_value_t = 5)]
    chain_length: usize,

    #[arg(long, default_value_t = 20)]
    max_steps: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let mut channel = SocketChannel::connect(&args.socket_name)?;
    tracing::debug!(
        socket_name = %args.socket_name,
        task = ?args.task,
        seed = args.seed,
        "worker connected"
    );
    match args.task {
        TaskFamily::Chain => {
            anyhow::ensure!(args.chain_length >= 3, "a chain needs at least three cells");
            let mut task = ChainTask::new(args.chain_length, args.max_steps, args.seed);
            serve(&mut task, &mut channel)?;
        }
    }
    tracing::debug!(socket_name = %args.socket_name, "worker exiting");
    Ok(())
}
