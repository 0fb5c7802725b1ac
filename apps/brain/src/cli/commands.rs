//! # CLI Command Implementations
//!
//! Each command has a `run_*` function returning a serialisable report and
//! a `cmd_*` wrapper that prints it as text or JSON.

use brain_core::primitives::{GROUP, VALUE};
use brain_core::{
    Aspect, Brain, BrainConfig, BrainError, BrainStats, ChangeEvent, ChannelObserver,
    CollectingDiagnostics, Diagnostic, InstructionKind, LockBatch, NodeData, NodeId, Processor,
    ProgramBuilder, ReclaimReport, StackStats, Value,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn ids(list: &[NodeId]) -> String {
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// DEMO COMMAND
// =============================================================================

/// Outcome of the cluster scenario.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub cluster: NodeId,
    pub a: NodeId,
    pub b: NodeId,
    pub after_insert: Vec<NodeId>,
    pub after_move: Vec<NodeId>,
    pub after_delete: Vec<NodeId>,
    /// Whether anything still refers to the deleted node.
    pub dangling: bool,
    pub events: Vec<ChangeEvent>,
}

/// Build a cluster, reorder it and delete a member, recording every event.
pub fn run_demo(config: BrainConfig) -> Result<DemoReport, BrainError> {
    let brain = Brain::new(config)?;
    let (tx, rx) = mpsc::channel();
    let handle = brain
        .events()
        .register_any(Arc::new(ChannelObserver::new(tx)));

    let cluster = brain.create(NodeData::Cluster { meaning: GROUP });
    let a = brain.create(NodeData::Neuron);
    let b = brain.create(NodeData::Neuron);

    brain.insert_child(cluster, a)?;
    brain.insert_child(cluster, b)?;
    let after_insert = brain.children(cluster)?;

    brain.move_child(cluster, 0, 1)?;
    let after_move = brain.children(cluster)?;

    brain.set_link(b, a, VALUE)?;
    brain.delete(a)?;
    let after_delete = brain.children(cluster)?;

    let dangling = after_delete.contains(&a)
        || brain.links_out(b)?.iter().any(|key| key.to == a)
        || brain.parents(b)?.contains(&a);

    brain.events().unregister_any(handle);
    let events = rx.try_iter().collect();

    Ok(DemoReport {
        cluster,
        a,
        b,
        after_insert,
        after_move,
        after_delete,
        dangling,
        events,
    })
}

pub fn cmd_demo(config: BrainConfig, json_mode: bool) -> Result<(), BrainError> {
    let report = run_demo(config)?;

    if json_mode {
        print_json(&report);
        return Ok(());
    }

    println!("Cluster Scenario");
    println!("================");
    println!("C = {}, A = {}, B = {}", report.cluster, report.a, report.b);
    println!();
    println!("insert A, B     -> [{}]", ids(&report.after_insert));
    println!("move 0 -> 1     -> [{}]", ids(&report.after_move));
    println!("delete A        -> [{}]", ids(&report.after_delete));
    println!("Dangling refs:  {}", if report.dangling { "yes" } else { "none" });
    println!();
    println!("Change events ({}):", report.events.len());
    for event in &report.events {
        println!("  {:?}", event);
    }

    Ok(())
}

// =============================================================================
// STRESS COMMAND
// =============================================================================

/// Parameters of a stress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressPlan {
    pub threads: usize,
    pub rounds: usize,
    pub nodes: usize,
    pub seed: u64,
}

/// Outcome of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub plan: StressPlan,
    pub elapsed_ms: u128,
    pub operations: u64,
    /// Parent lists mirror child lists and link indexes agree.
    pub consistent: bool,
    pub stats: BrainStats,
}

/// Run random lock batches and graph edits from `plan.threads` threads.
pub fn run_stress(config: BrainConfig, plan: &StressPlan) -> Result<StressReport, BrainError> {
    if plan.threads == 0 || plan.nodes < 2 {
        return Err(BrainError::Config(
            "stress needs at least 1 thread and 2 nodes".to_string(),
        ));
    }

    let brain = Arc::new(Brain::new(config)?);
    let cluster_count = plan.nodes / 2;
    let clusters: Arc<Vec<NodeId>> = Arc::new(
        (0..cluster_count)
            .map(|_| brain.create(NodeData::Cluster { meaning: GROUP }))
            .collect(),
    );
    let neurons: Arc<Vec<NodeId>> = Arc::new(
        (cluster_count..plan.nodes)
            .map(|_| brain.create(NodeData::Neuron))
            .collect(),
    );

    tracing::info!(
        threads = plan.threads,
        rounds = plan.rounds,
        nodes = plan.nodes,
        "stress run starting"
    );
    let started = Instant::now();

    let workers: Vec<_> = (0..plan.threads)
        .map(|worker| {
            let brain = Arc::clone(&brain);
            let clusters = Arc::clone(&clusters);
            let neurons = Arc::clone(&neurons);
            let seed = plan.seed.wrapping_add(worker as u64);
            let rounds = plan.rounds;
            thread::spawn(move || stress_worker(&brain, &clusters, &neurons, seed, rounds))
        })
        .collect();

    let mut operations = 0;
    for worker in workers {
        operations += worker
            .join()
            .map_err(|_| BrainError::InvariantViolation("stress worker panicked".to_string()))??;
    }
    let elapsed_ms = started.elapsed().as_millis();

    let consistent = check_consistency(&brain, &clusters, &neurons)?;
    if !consistent {
        tracing::error!("graph inconsistent after stress run");
    }

    Ok(StressReport {
        plan: *plan,
        elapsed_ms,
        operations,
        consistent,
        stats: brain.stats(),
    })
}

fn stress_worker(
    brain: &Brain,
    clusters: &[NodeId],
    neurons: &[NodeId],
    seed: u64,
    rounds: usize,
) -> Result<u64, BrainError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let all: Vec<NodeId> = clusters.iter().chain(neurons).copied().collect();
    let mut operations = 0;

    for _ in 0..rounds {
        let cluster = clusters[rng.gen_range(0..clusters.len())];
        let neuron = neurons[rng.gen_range(0..neurons.len())];
        match rng.gen_range(0..5) {
            0 => {
                let mut batch = LockBatch::new();
                for _ in 0..rng.gen_range(2..=4) {
                    let node = all[rng.gen_range(0..all.len())];
                    let aspect = Aspect::ALL[rng.gen_range(0..Aspect::ALL.len())];
                    if rng.gen_bool(0.5) {
                        batch.write(node, aspect);
                    } else {
                        batch.read(node, aspect);
                    }
                }
                drop(brain.locks().request_locks(batch)?);
            }
            1 => brain.insert_child(cluster, neuron)?,
            2 => {
                brain.remove_child(cluster, neuron)?;
            }
            3 => {
                let to = all[rng.gen_range(0..all.len())];
                brain.set_link(neuron, to, VALUE)?;
            }
            _ => {
                let to = all[rng.gen_range(0..all.len())];
                brain.remove_link(neuron, to, VALUE)?;
            }
        }
        operations += 1;
    }

    Ok(operations)
}

fn check_consistency(
    brain: &Brain,
    clusters: &[NodeId],
    neurons: &[NodeId],
) -> Result<bool, BrainError> {
    for neuron in neurons {
        let mut expected = 0;
        for cluster in clusters {
            expected += brain.child_occurrences(*cluster, *neuron)?;
        }
        if brain.parents(*neuron)?.len() != expected {
            return Ok(false);
        }
    }

    let mut outgoing = 0;
    let mut incoming = 0;
    for id in clusters.iter().chain(neurons) {
        outgoing += brain.links_out(*id)?.len();
        incoming += brain.links_in(*id)?.len();
    }
    let locks = brain.locks().stats();
    Ok(outgoing == incoming && outgoing == brain.link_count() && locks.acquired == locks.released)
}

pub fn cmd_stress(
    config: BrainConfig,
    json_mode: bool,
    plan: &StressPlan,
) -> Result<(), BrainError> {
    let report = run_stress(config, plan)?;

    if json_mode {
        print_json(&report);
    } else {
        println!("Stress Run");
        println!("==========");
        println!(
            "Threads: {}  Rounds: {}  Nodes: {}  Seed: {}",
            plan.threads, plan.rounds, plan.nodes, plan.seed
        );
        println!();
        println!("Operations:    {}", report.operations);
        println!("Elapsed:       {} ms", report.elapsed_ms);
        println!("Lock batches:  {}", report.stats.locks.batches);
        println!("Locks granted: {}", report.stats.locks.acquired);
        println!("Blocked waits: {}", report.stats.locks.waits);
        println!("Links at end:  {}", report.stats.links);
        println!("Consistent:    {}", report.consistent);
    }

    if !report.consistent {
        return Err(BrainError::InvariantViolation(
            "graph inconsistent after stress run".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// EXEC COMMAND
// =============================================================================

/// Outcome of the sample program.
#[derive(Debug, Clone, Serialize)]
pub struct ExecReport {
    /// Values left in the output cluster: sum, count, label.
    pub values: Vec<Value>,
    /// The same sum computed through the fast path.
    pub fast_path_sum: Option<i64>,
    pub mutated: bool,
    pub stack: StackStats,
    pub reclaim: ReclaimReport,
    pub diagnostics: Vec<Diagnostic>,
}

/// Store a program summing `values` in the graph, run it, and collect what
/// it left behind.
pub fn run_exec(config: BrainConfig, values: &[i64]) -> Result<ExecReport, BrainError> {
    let brain = Arc::new(Brain::new(config)?);
    let b = ProgramBuilder::new(&brain);
    let zero = b.int(0);

    let ints: Vec<NodeId> = values.iter().map(|v| b.int(*v)).collect();
    let numbers = b.cluster(GROUP, &ints)?;
    let output = b.cluster(GROUP, &[])?;
    let v = b.variable();

    // v := children(numbers); output += [v + 0, count(v), "sum=" ++ (v + 0)]
    let children = b.expression(InstructionKind::GetChildren, &[numbers])?;
    let assign = b.statement(InstructionKind::Assign, &[v, children])?;
    let sum = b.expression(InstructionKind::Add, &[v, zero])?;
    let count = b.expression(InstructionKind::Count, &[v])?;
    let label = b.expression(InstructionKind::Concat, &[b.text("sum="), sum])?;
    let keep = b.statement(InstructionKind::AddChild, &[output, sum, count, label])?;
    let block = b.block(&[assign, keep])?;

    let mut direct_args = ints.clone();
    direct_args.push(zero);
    let direct = b.expression(InstructionKind::Add, &direct_args)?;

    let diagnostics = Arc::new(CollectingDiagnostics::new());
    let mut processor = Processor::with_diagnostics(Arc::clone(&brain), diagnostics.clone());
    let run = processor.run_block(block)?;
    let fast_path_sum = processor.try_eval_int(direct);
    let stack = processor.stack_stats();
    let reclaim = processor.finish();

    let mut results = Vec::new();
    for id in brain.children(output)? {
        results.push(brain.value(id)?);
    }

    Ok(ExecReport {
        values: results,
        fast_path_sum,
        mutated: run.mutated,
        stack,
        reclaim,
        diagnostics: diagnostics.entries(),
    })
}

pub fn cmd_exec(config: BrainConfig, json_mode: bool, values: &[i64]) -> Result<(), BrainError> {
    let report = run_exec(config, values)?;

    if json_mode {
        print_json(&report);
        return Ok(());
    }

    println!("Program Execution");
    println!("=================");
    println!("Input:        {:?}", values);
    for value in &report.values {
        println!("Result:       {:?}", value);
    }
    println!("Fast path:    {:?}", report.fast_path_sum);
    println!("Mutated:      {}", report.mutated);
    println!(
        "Stack:        {} pushes / {} pops (max depth {})",
        report.stack.pushes, report.stack.pops, report.stack.max_depth
    );
    println!(
        "Temporaries:  {} released, {} kept, {} reclaimed",
        report.reclaim.candidates, report.reclaim.survived, report.reclaim.reclaimed
    );
    for diagnostic in &report.diagnostics {
        println!("{:?} [{}] {}", diagnostic.severity, diagnostic.tag, diagnostic.message);
    }

    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

pub fn cmd_config(config: &BrainConfig, json_mode: bool) -> Result<(), BrainError> {
    if json_mode {
        print_json(config);
        return Ok(());
    }

    println!("Engine Configuration");
    println!("====================");
    println!("pool_capacity      = {}", config.pool_capacity);
    println!("lock_wait_warn_ms  = {}", config.lock_wait_warn_ms);
    println!("max_lock_retries   = {}", config.max_lock_retries);
    println!("max_eval_depth     = {}", config.max_eval_depth);

    Ok(())
}
