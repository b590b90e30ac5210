use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::error;

use fedavg_sim::runner::{
    run_queue, ChunkExecutor, ChunkRunner, InProcessExecutor, ProcessExecutor, DEFAULT_CHUNK_SIZE,
};
use fedavg_sim::{
    BatchSize, ExperimentConfig, ModelKind, Orchestrator, PartitionKind, ResumePolicy, Result,
    RunOptions,
};

#[derive(Parser)]
#[command(version, about = "Federated Averaging simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment in this process
    Run {
        #[command(flatten)]
        experiment: ExperimentArgs,
        #[command(flatten)]
        persist: PersistArgs,
    },
    /// Run experiments as supervised chunks of rounds
    Chunked {
        #[command(flatten)]
        experiment: ExperimentArgs,
        #[command(flatten)]
        persist: PersistArgs,
        /// Rounds per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Seconds to wait before retrying a failed chunk
        #[arg(long, default_value_t = 5)]
        backoff_secs: u64,
        /// Run chunks in this process instead of child processes
        #[arg(long)]
        in_process: bool,
        /// Further config files to run after the first, in order
        #[arg(long, num_args = 1..)]
        queue: Vec<PathBuf>,
    },
    /// Run rounds START..=END of one experiment (used by `chunked`)
    Chunk {
        #[command(flatten)]
        experiment: ExperimentArgs,
        #[command(flatten)]
        persist: PersistArgs,
        /// First round
        #[arg(long)]
        start: usize,
        /// Last round
        #[arg(long)]
        end: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PartitionArg {
    Iid,
    NonIid,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Logistic,
    Mlp,
}

/// Experiment configuration: a JSON file, overridden by flags.
#[derive(Args)]
struct ExperimentArgs {
    /// JSON experiment config
    #[arg(long)]
    config: Option<PathBuf>,
    /// Dataset label
    #[arg(long)]
    dataset: Option<String>,
    /// Model architecture
    #[arg(long, value_enum)]
    model: Option<ModelArg>,
    /// Hidden units of the MLP
    #[arg(long)]
    hidden: Option<usize>,
    /// Partition scheme
    #[arg(long, value_enum)]
    partition: Option<PartitionArg>,
    /// Shards per client for the non-IID partition
    #[arg(long)]
    shards_per_client: Option<usize>,
    /// Total clients K
    #[arg(long)]
    num_clients: Option<usize>,
    /// Client fraction C
    #[arg(long)]
    client_fraction: Option<f64>,
    /// Local epochs E
    #[arg(long)]
    local_epochs: Option<usize>,
    /// Local batch size B, or "inf"
    #[arg(long)]
    batch_size: Option<BatchSize>,
    /// Learning-rate candidates, comma separated
    #[arg(long, value_delimiter = ',')]
    lr: Option<Vec<f32>>,
    /// SGD momentum
    #[arg(long)]
    momentum: Option<f32>,
    /// Target test accuracy
    #[arg(long)]
    target: Option<f32>,
    /// Total rounds
    #[arg(long)]
    rounds: Option<usize>,
    /// Experiment seed
    #[arg(long)]
    seed: Option<u64>,
    /// FedSGD baseline: B = inf, E = 1
    #[arg(long)]
    fedsgd: bool,
}

impl ExperimentArgs {
    fn load(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_path(path)?,
            None => ExperimentConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
        match (self.model, self.hidden) {
            (Some(ModelArg::Logistic), _) => config.model = ModelKind::Logistic,
            (Some(ModelArg::Mlp), hidden) => {
                config.model = ModelKind::Mlp {
                    hidden: hidden.unwrap_or(200),
                }
            }
            (None, Some(hidden)) => config.model = ModelKind::Mlp { hidden },
            (None, None) => {}
        }
        match self.partition {
            Some(PartitionArg::Iid) => config.partition = PartitionKind::Iid,
            Some(PartitionArg::NonIid) => config.partition = PartitionKind::non_iid(),
            None => {}
        }
        if let (Some(n), PartitionKind::Shards { shards_per_client, .. }) =
            (self.shards_per_client, &mut config.partition)
        {
            *shards_per_client = n;
        }
        if let Some(k) = self.num_clients {
            config.num_clients = k;
        }
        if let Some(c) = self.client_fraction {
            config.client_fraction = c;
        }
        if let Some(e) = self.local_epochs {
            config.local_epochs = e;
        }
        if let Some(b) = self.batch_size {
            config.batch_size = b;
        }
        if let Some(lr) = &self.lr {
            config.lr_grid = lr.clone();
        }
        if let Some(m) = self.momentum {
            config.momentum = m;
        }
        if let Some(t) = self.target {
            config.target_accuracy = t;
        }
        if let Some(r) = self.rounds {
            config.total_rounds = r;
        }
        if let Some(s) = self.seed {
            config.seed = s;
        }
        if self.fedsgd {
            *config = config.clone().fedsgd();
        }
    }
}

/// Where checkpoints and round records go.
#[derive(Args)]
struct PersistArgs {
    /// Checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Round Record CSV log
    #[arg(long)]
    log_path: Option<PathBuf>,
    /// First round to run; > 1 resumes from the checkpoint
    #[arg(long, default_value_t = 1)]
    start_round: usize,
    /// Fail instead of restarting when no checkpoint exists to resume from
    #[arg(long)]
    refuse_unsafe_resume: bool,
}

impl PersistArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            checkpoint_dir: self.checkpoint_dir.clone(),
            log_path: self.log_path.clone(),
            start_round: self.start_round,
            resume_policy: if self.refuse_unsafe_resume {
                ResumePolicy::Refuse
            } else {
                ResumePolicy::RestartFromScratch
            },
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli.command) {
        error!("{}", e);
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            experiment,
            persist,
        } => {
            let config = experiment.load()?;
            let mut orchestrator = Orchestrator::from_config(config)?.with_options(persist.options());
            let outcome = orchestrator.run()?;
            if let Some(last) = outcome.records.last() {
                println!(
                    "{}: round {} accuracy {:.4}, rounds to {:.2}: {}",
                    orchestrator.config().key(),
                    last.round,
                    last.test_accuracy,
                    last.target,
                    orchestrator.rounds_to_target()
                );
            }
            Ok(())
        }
        Commands::Chunked {
            experiment,
            persist,
            chunk_size,
            backoff_secs,
            in_process,
            queue,
        } => {
            let mut configs = vec![experiment.load()?];
            for path in &queue {
                let mut config = ExperimentConfig::from_path(path)?;
                experiment.apply(&mut config);
                configs.push(config);
            }
            let options = persist.options();
            let backoff = Duration::from_secs(backoff_secs);
            if in_process {
                let runner = ChunkRunner::new(InProcessExecutor)
                    .chunk_size(chunk_size)
                    .backoff(backoff);
                run_all(&runner, &configs, &options)
            } else {
                let runner = ChunkRunner::new(ProcessExecutor::current_exe()?)
                    .chunk_size(chunk_size)
                    .backoff(backoff);
                run_all(&runner, &configs, &options)
            }
        }
        Commands::Chunk {
            experiment,
            persist,
            start,
            end,
        } => {
            let config = experiment.load()?;
            InProcessExecutor.execute(&config, &persist.options(), start, end)
        }
    }
}

fn run_all<E: ChunkExecutor>(
    runner: &ChunkRunner<E>,
    configs: &[ExperimentConfig],
    options: &RunOptions,
) -> Result<()> {
    let entries = run_queue(runner, configs, options);
    let mut failed = 0;
    for entry in &entries {
        match &entry.result {
            Ok(summary) => println!(
                "{}: {} rounds done in {} chunks ({} retries)",
                entry.key, summary.last_round, summary.chunks, summary.retries
            ),
            Err(e) => {
                failed += 1;
                println!("{}: FAILED: {}", entry.key, e);
            }
        }
    }
    if failed > 0 {
        eprintln!("{} of {} experiments failed", failed, entries.len());
        process::exit(1);
    }
    Ok(())
}
