use anyhow::Result;
use approx::assert_abs_diff_eq;
use solverforge::autotune::catalog::SolverCatalog;
use solverforge::autotune::executor::TrialExecutor;
use solverforge::autotune::search::RecordUpdate;
use solverforge::autotune::solver::{ExecutablePlan, ExecutionContext, TunableSolver};
use solverforge::autotune::solvers::{ReferenceConfig, ReferenceSolver, TiledSolver};
use solverforge::backend_cpu::{
    DispatchOptions, Dispatcher, FindEnforce, ResolutionSource,
};
use solverforge::kernels::config::{ActivationKind, DataType};
use solverforge::kernels::matmul::{MatmulInputs, ReferenceMatmul};
use solverforge::kernels::problem::{DeviceInfo, MatmulProblem, ProblemFingerprint};
use solverforge::kernels::utils::synthetic_operands;
use solverforge::perfdb::preload::PreloadState;
use solverforge::perfdb::record::{PerformanceRecord, SolverId};
use solverforge::perfdb::store::{MutableStore, ReadonlyStore};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Deterministic stand-in for timing: cost is the plan label length.
#[derive(Default)]
struct LabelCostExecutor {
    trials: AtomicUsize,
}

impl TrialExecutor for LabelCostExecutor {
    fn measure(&self, plan: &ExecutablePlan, _problem: &MatmulProblem) -> Result<f64> {
        self.trials.fetch_add(1, Ordering::SeqCst);
        Ok(plan.description.len() as f64)
    }
}

fn device() -> DeviceInfo {
    DeviceInfo::new("x86_64", 4)
}

fn tiled_catalog() -> SolverCatalog {
    let mut catalog = SolverCatalog::new();
    catalog.register(TiledSolver);
    catalog.register(ReferenceSolver);
    catalog
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

fn fast_options(dir: &Path) -> DispatchOptions {
    DispatchOptions::default()
        .with_user_db(dir.join("user.jsonl"))
        .with_runs(0, 1)
}

#[test]
fn tuned_configuration_is_reused_and_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = fast_options(dir.path());
    let problem = MatmulProblem::new(64, 64, 64, DataType::F32);

    let first = {
        let preload = PreloadState::new();
        let dispatcher = Dispatcher::with_options(&options, &preload)?;
        assert!(preload.is_started());

        let first = dispatcher.resolve(&problem)?;
        assert_eq!(first.source, ResolutionSource::Search);
        assert_eq!(first.record, Some(RecordUpdate::Inserted));

        let second = dispatcher.resolve(&problem)?;
        assert_eq!(second.source, ResolutionSource::UserDb);
        assert_eq!(second.solver, first.solver);
        assert_eq!(second.config, first.config);
        first
    };

    let preload = PreloadState::new();
    let restarted = Dispatcher::with_options(&options, &preload)?;
    let again = restarted.resolve(&problem)?;
    assert_eq!(again.source, ResolutionSource::UserDb);
    assert_eq!(again.config, first.config);
    Ok(())
}

#[test]
fn heuristic_path_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = fast_options(dir.path()).with_enforce(FindEnforce::None);
    let preload = PreloadState::new();
    let dispatcher = Dispatcher::with_options(&options, &preload)?;

    let resolution = dispatcher.resolve(&MatmulProblem::new(96, 64, 32, DataType::F32))?;
    assert_eq!(resolution.source, ResolutionSource::Heuristic);
    assert!(resolution.record.is_none());
    assert_eq!(dispatcher.user_records(), 0);
    assert_eq!(line_count(&dir.path().join("user.jsonl")), 0);
    Ok(())
}

#[test]
fn system_table_serves_shipped_configuration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let system = dir.path().join("system.jsonl");
    let problem = MatmulProblem::new(128, 128, 64, DataType::F32);
    let blob = "{\"tile_m\":64,\"tile_n\":64,\"tile_k\":32,\"vector_width\":8}";
    {
        let mut writer = MutableStore::open(&system)?;
        writer.upsert(PerformanceRecord::new(
            SolverId::from("gemm.tiled"),
            ProblemFingerprint::derive(&problem, &device()),
            blob,
        ))?;
    }

    let executor = Arc::new(LabelCostExecutor::default());
    let dispatcher = Dispatcher::new(
        tiled_catalog(),
        ExecutionContext::new(device()),
        executor.clone(),
    )
    .with_user_store(MutableStore::open(dir.path().join("user.jsonl"))?)
    .with_system_store(Arc::new(ReadonlyStore::open(&system)?));

    let resolution = dispatcher.resolve(&problem)?;
    assert_eq!(resolution.source, ResolutionSource::SystemDb);
    assert_eq!(resolution.config.as_deref(), Some(blob));
    assert_eq!(executor.trials.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn stale_or_garbled_records_are_misses() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let user = dir.path().join("user.jsonl");
    let small = MatmulProblem::new(20, 20, 20, DataType::F32);
    let other = MatmulProblem::new(32, 32, 32, DataType::F32);
    {
        let mut writer = MutableStore::open(&user)?;
        // Tiles larger than the problem no longer validate.
        writer.upsert(PerformanceRecord::new(
            SolverId::from("gemm.tiled"),
            ProblemFingerprint::derive(&small, &device()),
            "{\"tile_m\":128,\"tile_n\":128,\"tile_k\":64,\"vector_width\":8}",
        ))?;
        writer.upsert(PerformanceRecord::new(
            SolverId::from("gemm.tiled"),
            ProblemFingerprint::derive(&other, &device()),
            "not a configuration",
        ))?;
    }

    let dispatcher = Dispatcher::new(
        tiled_catalog(),
        ExecutionContext::new(device()),
        Arc::new(LabelCostExecutor::default()),
    )
    .with_enforce(FindEnforce::None)
    .with_user_store(MutableStore::open(&user)?);

    for problem in [small, other] {
        let resolution = dispatcher.resolve(&problem)?;
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert_eq!(resolution.solver, SolverId::from("gemm.tiled"));
    }
    Ok(())
}

#[test]
fn db_update_skips_unchanged_winner() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let user = dir.path().join("user.jsonl");
    let problem = MatmulProblem::new(64, 64, 64, DataType::F32);
    let catalog = tiled_catalog();
    let ctx = ExecutionContext::new(device());

    let first = Dispatcher::new(catalog.clone(), ctx.clone(), Arc::new(LabelCostExecutor::default()))
        .with_user_store(MutableStore::open(&user)?)
        .resolve(&problem)?;
    assert_eq!(first.record, Some(RecordUpdate::Inserted));
    assert_eq!(line_count(&user), 1);

    let executor = Arc::new(LabelCostExecutor::default());
    let updater = Dispatcher::new(catalog, ctx, executor.clone())
        .with_enforce(FindEnforce::DbUpdate)
        .with_user_store(MutableStore::open(&user)?);
    let second = updater.resolve(&problem)?;
    assert_eq!(second.source, ResolutionSource::Search);
    assert_eq!(second.record, Some(RecordUpdate::Unchanged));
    assert_eq!(second.config, first.config);
    assert!(executor.trials.load(Ordering::SeqCst) > 0);
    assert_eq!(line_count(&user), 1);
    Ok(())
}

#[test]
fn executed_plan_matches_reference_product() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let preload = PreloadState::new();
    let dispatcher = Dispatcher::with_options(&fast_options(dir.path()), &preload)?;

    let problem = MatmulProblem::new(48, 40, 24, DataType::F32);
    let (lhs, rhs) = synthetic_operands(&problem, 42);
    let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::None);
    let execution = dispatcher.execute(&problem, &inputs)?;

    let expected = lhs.dot(&rhs);
    assert_eq!(execution.output.dim(), expected.dim());
    for (got, want) in execution.output.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
    }
    Ok(())
}

/// Never applicable; counts every call that would mean it was used anyway.
#[derive(Default)]
struct NeverApplicable {
    calls: Arc<AtomicUsize>,
}

impl TunableSolver for NeverApplicable {
    type Config = ReferenceConfig;

    fn name(&self) -> &'static str {
        "gemm.never"
    }

    fn is_applicable(&self, _ctx: &ExecutionContext, _problem: &MatmulProblem) -> bool {
        false
    }

    fn default_config(&self, _problem: &MatmulProblem) -> ReferenceConfig {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ReferenceConfig
    }

    fn is_valid_config(&self, _problem: &MatmulProblem, _config: &ReferenceConfig) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn build_solution(&self, _problem: &MatmulProblem, _config: &ReferenceConfig) -> ExecutablePlan {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExecutablePlan::new(
            SolverId::new(self.name()),
            Arc::new(ReferenceMatmul::new()),
            "never",
        )
    }
}

#[test]
fn inapplicable_solver_is_never_tuned_or_built() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut catalog = SolverCatalog::new();
    catalog.register(NeverApplicable {
        calls: calls.clone(),
    });
    catalog.register(TiledSolver);

    let executor = Arc::new(LabelCostExecutor::default());
    let dispatcher = Dispatcher::new(catalog, ExecutionContext::new(device()), executor);
    let resolution = dispatcher.resolve(&MatmulProblem::new(32, 32, 32, DataType::F32))?;
    assert_eq!(resolution.solver, SolverId::from("gemm.tiled"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn concurrent_resolution_shares_one_dispatcher() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = Arc::new(
        Dispatcher::new(
            tiled_catalog(),
            ExecutionContext::new(device()),
            Arc::new(LabelCostExecutor::default()),
        )
        .with_user_store(MutableStore::open(dir.path().join("user.jsonl"))?),
    );

    let sizes = [16, 32, 48, 64, 80, 96];
    thread::scope(|scope| {
        for size in sizes {
            let dispatcher = Arc::clone(&dispatcher);
            scope.spawn(move || {
                let problem = MatmulProblem::new(size, size, size, DataType::F32);
                let resolution = dispatcher.resolve(&problem).unwrap();
                assert_eq!(resolution.source, ResolutionSource::Search);
            });
        }
    });

    assert_eq!(dispatcher.user_records(), sizes.len());
    for size in sizes {
        let problem = MatmulProblem::new(size, size, size, DataType::F32);
        assert_eq!(dispatcher.resolve(&problem)?.source, ResolutionSource::UserDb);
    }
    Ok(())
}
