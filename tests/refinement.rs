// SPDX-License-Identifier: BSD-3-Clause
use std::sync::Arc;

use yabam::domain::{ValueAnalysis, ValuePrecision, ValueState};
use yabam::remover::RemovalBatch;
use yabam::{Bam, BlockPartitioning, NodeId, Options, Program, Reconstruction, StateId, Status};

// ------------------------------------------------------------------
// Helpers

fn bam(name: &str, opts: Options) -> Bam<ValueAnalysis> {
    let path = format!("tests/programs/{}.json", name);
    let program = Program::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let partitioning = Arc::new(BlockPartitioning::new(
        &program.cfa,
        &program.loops,
        None,
    ));
    let cfa = Arc::new(program.cfa);
    let analysis = ValueAnalysis::new(Arc::clone(&cfa), Arc::clone(&partitioning));
    Bam::new(analysis, cfa, partitioning, opts).unwrap()
}

/// Run to the first target and reconstruct the path to it.
fn counterexample(bam: &mut Bam<ValueAnalysis>) -> Vec<StateId> {
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    let owner = bam.arg().owner(target);
    match bam.reconstruct_counterexample(target, owner).unwrap() {
        Reconstruction::Found(cex) => cex.path(),
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

fn vars(names: &[&str]) -> ValuePrecision {
    names.iter().map(|v| v.to_string()).collect()
}

fn has_entry(
    bam: &Bam<ValueAnalysis>,
    block: &str,
    entry: u32,
    precision: &ValuePrecision,
) -> bool {
    let block = bam.partitioning().block_by_name(block).unwrap().id();
    bam.cache().contains_precise_key(
        bam.reducer(),
        &ValueState::new(NodeId(entry)),
        precision,
        block,
    )
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    states: usize,
    sets: usize,
    entries: usize,
    returns: usize,
    waiting: usize,
}

fn snapshot(bam: &Bam<ValueAnalysis>) -> Snapshot {
    Snapshot {
        states: bam.reached_sets().iter().map(|s| s.len()).sum(),
        sets: bam.reached_sets().len(),
        entries: bam.cache().len(),
        returns: bam.cache().returns_len(),
        waiting: bam.reached_sets().iter().map(|s| s.waiting_len()).sum(),
    }
}

// ------------------------------------------------------------------
// Tests

#[test]
fn two_nested_blocks_rekeyed() {
    let mut bam = bam("safe/nested", Options::default());
    let path = counterexample(&mut bam);
    let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
    assert_eq!(locations, vec![0, 10, 20, 21, 22]);
    let none = ValuePrecision::new();
    let x = vars(&["x"]);
    assert!(has_entry(&bam, "f", 10, &none));
    assert!(has_entry(&bam, "g", 20, &none));

    // `x := 0` inside `g` is the first step needing `x`
    bam.remove_subtree(&path, 3, &x);

    assert!(!has_entry(&bam, "f", 10, &none));
    assert!(!has_entry(&bam, "g", 20, &none));
    assert!(has_entry(&bam, "f", 10, &x));
    assert!(has_entry(&bam, "g", 20, &x));
    assert_eq!(bam.cache().returns_len(), 0);
    for s in &path[1..] {
        assert!(bam.arg().is_destroyed(*s), "{s} survived");
    }
    let g_set = bam.arg().owner(path[3]);
    let g_root = bam.reached(g_set).first_state().unwrap();
    assert_eq!(bam.reached(g_set).precision(g_root), Some(&x));

    assert_eq!(bam.run_main().unwrap(), Status::Complete);
    // the program's own precision is unchanged, `f` is found by similarity
    assert_eq!(bam.cache().aliases_len(), 1);
    assert_eq!(bam.cache().returns_len(), 2);
}

#[test]
fn aggressive_caching_pins_inner_entry() {
    let x = vars(&["x"]);
    let none = ValuePrecision::new();
    for aggressive in [true, false] {
        let opts = Options {
            aggressive_caching: aggressive,
            ..Options::default()
        };
        let mut bam = bam("safe/pinned", opts);
        let path = counterexample(&mut bam);
        let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
        assert_eq!(locations, vec![0, 10, 11, 20, 21]);

        bam.remove_subtree(&path, 2, &x);

        assert!(has_entry(&bam, "f", 10, &x));
        assert!(!has_entry(&bam, "f", 10, &none));
        assert_eq!(has_entry(&bam, "g", 20, &x), aggressive);
        // the inner block was not on the removed part of its reached-set
        assert!(has_entry(&bam, "g", 20, &none));
        assert_eq!(bam.precision(path[0]), Some(&x));

        assert_eq!(bam.run_main().unwrap(), Status::Complete);
    }
}

#[test]
fn repeated_removal_changes_nothing() {
    let mut bam = bam("safe/refined_constant", Options::default());
    let path = counterexample(&mut bam);
    let x = vars(&["x"]);
    bam.remove_subtree(&path, 1, &x);
    let before = snapshot(&bam);
    bam.remove_subtree(&path, 1, &x);
    assert_eq!(snapshot(&bam), before);
    assert_eq!(bam.run_main().unwrap(), Status::Complete);
}

#[test]
fn batch_keeps_outermost_removal() {
    let x = vars(&["x"]);
    let y = vars(&["y"]);

    let mut bam = bam("safe/straight", Options::default());
    let path = counterexample(&mut bam);
    assert_eq!(path.len(), 4);
    let mut batch = RemovalBatch::default();
    bam.schedule_removal(&mut batch, &path, 2, &y);
    assert_eq!(batch.pairs().collect::<Vec<_>>(), vec![(path[0], path[2])]);
    bam.schedule_removal(&mut batch, &path, 1, &x);
    assert_eq!(batch.pairs().collect::<Vec<_>>(), vec![(path[0], path[1])]);
    bam.apply_batch(batch);
    for s in &path[1..] {
        assert!(bam.arg().is_destroyed(*s));
    }
    assert_eq!(bam.precision(path[0]), Some(&x));
    assert_eq!(bam.run_main().unwrap(), Status::Complete);

    let mut bam2 = self::bam("safe/straight", Options::default());
    let path = counterexample(&mut bam2);
    let mut batch = RemovalBatch::default();
    bam2.schedule_removal(&mut batch, &path, 1, &x);
    bam2.schedule_removal(&mut batch, &path, 2, &y);
    assert_eq!(batch.len(), 1);
}

#[test]
fn refinement_inside_loop_block() {
    let mut bam = bam("safe/counting_loop", Options::default());
    let path = counterexample(&mut bam);
    let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
    assert_eq!(locations, vec![0, 1, 3, 9]);
    let i = vars(&["i"]);
    bam.remove_subtree(&path, 1, &i);
    assert!(has_entry(&bam, "count", 1, &i));
    assert_eq!(bam.run_main().unwrap(), Status::Complete);
    // one state per iteration at the loop head
    let loop_sets = bam
        .reached_sets()
        .iter()
        .filter(|s| s.block().is_some() && s.at_location(NodeId(1)).count() == 4)
        .count();
    assert_eq!(loop_sets, 1);
}

#[test]
fn cut_below_root_drops_entry() {
    let mut bam = bam("unsafe/deep_error", Options::default());
    let path = counterexample(&mut bam);
    let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
    assert_eq!(locations, vec![0, 1, 10, 11, 20, 21]);
    let none = ValuePrecision::new();
    let y = vars(&["y"]);
    assert!(has_entry(&bam, "f", 10, &none));
    assert_eq!(bam.data().sizes(), (2, 2));

    // `f` loses the call of `g`, which sits below its root
    bam.remove_subtree(&path, 5, &y);

    assert!(!has_entry(&bam, "f", 10, &none));
    assert!(!has_entry(&bam, "f", 10, &y));
    assert!(!has_entry(&bam, "g", 20, &none));
    assert!(has_entry(&bam, "g", 20, &y));
    assert_eq!(bam.cache().returns_len(), 0);
    assert_eq!(bam.data().sizes(), (0, 0));

    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.location(target), NodeId(21));
}
