//! CLI wiring: tune problems, inspect and compact performance tables.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use solverforge_backend_cpu::{Dispatcher, DispatchOptions, FindEnforce};
use solverforge_kernels::config::{ActivationKind, DataType, Transpose};
use solverforge_kernels::matmul::MatmulInputs;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_kernels::utils::synthetic_operands;
use solverforge_perfdb::preload::PreloadState;
use solverforge_perfdb::record::{PerformanceRecord, SolverId};
use solverforge_perfdb::store::{MutableStore, ReadonlyStore};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "solverforge", about = "Solver selection and autotuning toolkit")]
pub struct Cli {
    /// Mutable table receiving tuned configurations.
    #[arg(long, global = true)]
    pub user_db: Option<PathBuf>,

    /// Shipped read-only table.
    #[arg(long, global = true)]
    pub system_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum EnforceArg {
    None,
    Search,
    DbUpdate,
}

impl From<EnforceArg> for FindEnforce {
    fn from(value: EnforceArg) -> FindEnforce {
        match value {
            EnforceArg::None => FindEnforce::None,
            EnforceArg::Search => FindEnforce::Search,
            EnforceArg::DbUpdate => FindEnforce::DbUpdate,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum DataTypeArg {
    F32,
    F16,
    Bf16,
}

impl From<DataTypeArg> for DataType {
    fn from(value: DataTypeArg) -> DataType {
        match value {
            DataTypeArg::F32 => DataType::F32,
            DataTypeArg::F16 => DataType::F16,
            DataTypeArg::Bf16 => DataType::BF16,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProblemArgs {
    #[arg(long, default_value_t = 256)]
    pub m: usize,
    #[arg(long, default_value_t = 256)]
    pub n: usize,
    #[arg(long, default_value_t = 256)]
    pub k: usize,
    #[arg(long, value_enum, default_value = "f32")]
    pub dtype: DataTypeArg,
    #[arg(long, default_value_t = false)]
    pub trans_a: bool,
    #[arg(long, default_value_t = false)]
    pub trans_b: bool,
}

impl ProblemArgs {
    fn problem(&self) -> MatmulProblem {
        let transpose = |flag: bool| if flag { Transpose::Yes } else { Transpose::No };
        MatmulProblem::new(self.m, self.n, self.k, self.dtype.into())
            .with_transpose(transpose(self.trans_a), transpose(self.trans_b))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a problem through the cache, tuning on a miss.
    Tune {
        #[command(flatten)]
        problem: ProblemArgs,
        /// Policy on a cache miss; defaults to SOLVERFORGE_FIND_ENFORCE or search.
        #[arg(long, value_enum)]
        enforce: Option<EnforceArg>,
        #[arg(long, default_value_t = 1)]
        warmup: usize,
        #[arg(long, default_value_t = 5)]
        runs: usize,
        /// Also run the chosen plan once on synthetic inputs.
        #[arg(long, default_value_t = false)]
        execute: bool,
    },
    /// Print the cached configuration for a solver and problem.
    Lookup {
        #[command(flatten)]
        problem: ProblemArgs,
        #[arg(long)]
        solver: String,
    },
    /// Print every record of a table as JSON lines.
    Dump {
        /// Table to dump; defaults to --user-db.
        #[arg(long)]
        table: Option<PathBuf>,
    },
    /// Rewrite the user table without superseded lines.
    Compact,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        user_db,
        system_db,
        command,
    } = cli;
    let mut options = DispatchOptions::from_env();
    if let Some(path) = user_db {
        options.user_db = Some(path);
    }
    if let Some(path) = system_db {
        options.system_db = Some(path);
    }

    match command {
        Command::Tune {
            problem,
            enforce,
            warmup,
            runs,
            execute,
        } => {
            if let Some(enforce) = enforce {
                options.enforce = enforce.into();
            }
            let options = options.with_runs(warmup, runs);
            let preload = PreloadState::new();
            let dispatcher = Dispatcher::with_options(&options, &preload)?;
            let problem = problem.problem();
            let resolution = dispatcher.resolve(&problem)?;
            info!(
                solver = %resolution.solver,
                source = ?resolution.source,
                "problem resolved"
            );

            let mut summary = serde_json::json!({
                "fingerprint": resolution.fingerprint.as_str(),
                "solver": resolution.solver.as_str(),
                "source": format!("{:?}", resolution.source),
                "config": resolution.config,
                "plan": resolution.plan.description,
                "record": resolution.record.map(|update| format!("{update:?}")),
            });

            if execute {
                let (lhs, rhs) = synthetic_operands(&problem, 0x5eed);
                let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::None);
                let execution = dispatcher.run(resolution, &problem, &inputs)?;
                summary["elapsed_ms"] = serde_json::json!(execution.elapsed_ms);
                summary["gflops"] =
                    serde_json::json!(problem.flops() / (execution.elapsed_ms.max(1e-9) * 1.0e6));
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Lookup { problem, solver } => {
            let options = options.with_preload(false);
            let preload = PreloadState::new();
            let dispatcher = Dispatcher::with_options(&options, &preload)?;
            let problem = problem.problem();
            match dispatcher.cached_config(&SolverId::new(solver.as_str()), &problem) {
                Some(config) => println!("{config}"),
                None => bail!(
                    "no record for solver {solver} and problem {}",
                    dispatcher.fingerprint(&problem)
                ),
            }
        }
        Command::Dump { table } => {
            let Some(path) = table.or(options.user_db) else {
                bail!("dump needs --table or --user-db");
            };
            let store = ReadonlyStore::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            for record in store.records() {
                println!("{}", serde_json::to_string::<PerformanceRecord>(record)?);
            }
        }
        Command::Compact => {
            let Some(path) = options.user_db else {
                bail!("compact needs --user-db or SOLVERFORGE_USER_DB");
            };
            let store = MutableStore::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let records = store.len();
            store.compact()?;
            println!("compacted {} to {records} records", path.display());
        }
    }

    Ok(())
}
