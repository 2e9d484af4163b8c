// SPDX-License-Identifier: BSD-3-Clause
use std::sync::Arc;

use yabam::domain::{ValueAnalysis, ValuePrecision, ValueState};
use yabam::{Analysis, Bam, BlockPartitioning, Error, NodeId, Options, Program, Status};

// ------------------------------------------------------------------
// Helpers

fn load(name: &str) -> (Arc<yabam::Cfa>, Arc<BlockPartitioning>) {
    let path = format!("tests/programs/{}.json", name);
    let text = std::fs::read_to_string(&path).unwrap();
    let program = Program::from_json(&text).unwrap();
    let partitioning = BlockPartitioning::new(&program.cfa, &program.loops, None);
    (Arc::new(program.cfa), Arc::new(partitioning))
}

fn bam(name: &str, opts: Options) -> Bam<ValueAnalysis> {
    let (cfa, partitioning) = load(name);
    let analysis = ValueAnalysis::new(Arc::clone(&cfa), Arc::clone(&partitioning));
    Bam::new(analysis, cfa, partitioning, opts).unwrap()
}

fn locations(bam: &Bam<ValueAnalysis>, path: &[yabam::StateId]) -> Vec<u32> {
    path.iter().map(|s| bam.location(*s).0).collect()
}

// ------------------------------------------------------------------
// Tests

#[test]
fn second_call_site_hits_cache() {
    let mut bam = bam("safe/two_call_sites", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.location(target), NodeId(3));
    assert_eq!(bam.stats().block_calls, 2);
    assert_eq!(bam.cache().stats().misses, 1);
    assert_eq!(bam.cache().stats().full_hits, 1);
    assert_eq!(bam.cache().len(), 1);
    assert_eq!(bam.cache().returns_len(), 1);
    // the program plus one set for `f`
    assert_eq!(bam.reached_sets().len(), 2);
}

#[test]
fn recursion_uses_exits_in_flight() {
    let mut bam = bam("safe/recursive", Options::default());
    assert_eq!(bam.run_main().unwrap(), Status::Complete);
    assert_eq!(bam.stats().block_calls, 2);
    assert_eq!(bam.stats().max_depth, 2);
    assert_eq!(bam.stats().in_flight_hits, 1);
    assert_eq!(bam.cache().stats().partial_hits, 1);
    assert_eq!(bam.cache().stats().misses, 1);

    let main = bam.main_reached().unwrap();
    let at_exit: Vec<_> = bam.reached(main).at_location(NodeId(1)).collect();
    assert_eq!(at_exit.len(), 1);
}

#[test]
fn recursion_limit() {
    let opts = Options {
        max_recursion_depth: Some(1),
        ..Options::default()
    };
    let mut bam = bam("safe/recursive", opts);
    let err = bam.run_main().unwrap_err();
    assert!(matches!(err, Error::RecursionLimit { limit: 1 }), "{err}");
}

#[test]
fn interrupted() {
    let mut bam = bam("safe/recursive", Options::default());
    bam.shutdown_notifier().request_shutdown();
    assert!(matches!(bam.run_main(), Err(Error::Interrupted)));
}

#[test]
fn exits_are_expanded_into_caller() {
    let mut bam = bam("unsafe/deep_error", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.arg().owner(target), bam.main_reached().unwrap());
    assert_eq!(bam.location(target), NodeId(21));
    // caller's stack survives the reduction
    assert_eq!(bam.state(target).stack, vec![NodeId(2)]);
    let exit = bam.data().block_exit(target).unwrap();
    let inner = bam.data().innermost_state(target);
    assert_ne!(exit.reduced, target);
    assert!(bam.state(inner).stack.is_empty());
    assert_eq!(bam.stats().max_depth, 2);
}

#[test]
fn counterexample_through_nested_blocks() {
    let mut bam = bam("unsafe/deep_error", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    let main = bam.main_reached().unwrap();
    let yabam::Reconstruction::Found(cex) = bam.reconstruct_counterexample(target, main).unwrap()
    else {
        panic!("expected a counterexample");
    };
    assert_eq!(cex.root(), bam.reached(main).first_state().unwrap());
    let path = cex.path();
    assert_eq!(locations(&bam, &path), vec![0, 1, 10, 11, 20, 21]);
    // the call states stay in their caller's reached-set
    assert_eq!(bam.arg().owner(path[2]), main);
    assert_ne!(bam.arg().owner(path[4]), main);
    assert_eq!(bam.stats().reconstructions, 1);
}

#[test]
fn loop_block() {
    let mut bam = bam("safe/counting_loop", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.location(target), NodeId(9));
    let block = bam.partitioning().block_by_name("count").unwrap();
    let reduced = ValueState::new(NodeId(1));
    assert!(bam.cache().contains_precise_key(
        bam.reducer(),
        &reduced,
        &ValuePrecision::new(),
        block.id()
    ));
}

#[test]
fn missing_reducer() {
    struct Plain;

    impl yabam::Analysis for Plain {
        type State = ValueState;
        type Precision = ValuePrecision;
        type Reducer = yabam::domain::ValueReducer;

        fn name(&self) -> &str {
            "plain"
        }
        fn reducer(&self) -> Option<Self::Reducer> {
            None
        }
        fn initial_state(&self, node: NodeId) -> ValueState {
            ValueState::new(node)
        }
        fn initial_precision(&self, _: NodeId) -> ValuePrecision {
            ValuePrecision::new()
        }
        fn location(&self, state: &ValueState) -> NodeId {
            state.location
        }
        fn successors(
            &self,
            _: &ValueState,
            _: &ValuePrecision,
            _: &yabam::cfa::Edge,
        ) -> yabam::Result<Vec<ValueState>> {
            Ok(Vec::new())
        }
        fn is_less_or_equal(&self, a: &ValueState, b: &ValueState) -> bool {
            a == b
        }
        fn is_target(&self, _: &ValueState) -> bool {
            false
        }
        fn refine_precision(&self, a: &ValuePrecision, _: &ValuePrecision) -> ValuePrecision {
            a.clone()
        }
    }

    let (cfa, partitioning) = load("safe/recursive");
    let err = Bam::new(Plain, cfa, partitioning, Options::default())
        .err()
        .unwrap();
    assert!(err.to_string().contains("`plain` provides no reducer"));
}

#[test]
fn late_base_case_reexplores_recursive_call() {
    let mut bam = bam("unsafe/late_base_case", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.location(target), NodeId(99));
    assert_eq!(bam.arg().owner(target), bam.main_reached().unwrap());
    // the recursive call saw no exit the first time around
    assert_eq!(bam.stats().recursive_reruns, 1);
    assert_eq!(bam.stats().in_flight_hits, 2);
}

#[test]
fn mutual_recursion_returns_into_caller() {
    let mut bam = bam("unsafe/mutual_recursion", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.location(target), NodeId(99));
    assert_eq!(bam.stats().recursive_reruns, 0);
    assert_eq!(bam.stats().max_depth, 3);
}

#[test]
fn finished_block_reruns_for_recursive_call() {
    let mut bam = bam("unsafe/mutual_recursion_late", Options::default());
    let Status::TargetFound(target) = bam.run_main().unwrap() else {
        panic!("expected a target");
    };
    assert_eq!(bam.location(target), NodeId(99));
    assert_eq!(bam.arg().owner(target), bam.main_reached().unwrap());
    assert_eq!(bam.stats().recursive_reruns, 1);

    // `g` now answers with the target it found on the second run
    let g = bam.partitioning().block_by_name("g").unwrap();
    let reduced = ValueState::new(NodeId(20));
    assert!(bam.cache().contains_precise_key(
        bam.reducer(),
        &reduced,
        &ValuePrecision::new(),
        g.id()
    ));
    assert_eq!(bam.cache().returns_len(), 2);
}

#[test]
fn failing_analysis_is_wrapped_once() {
    struct FailsAt {
        inner: ValueAnalysis,
        node: NodeId,
    }

    impl yabam::Analysis for FailsAt {
        type State = ValueState;
        type Precision = ValuePrecision;
        type Reducer = yabam::domain::ValueReducer;

        fn name(&self) -> &str {
            "fails-at"
        }
        fn reducer(&self) -> Option<Self::Reducer> {
            self.inner.reducer()
        }
        fn initial_state(&self, node: NodeId) -> ValueState {
            self.inner.initial_state(node)
        }
        fn initial_precision(&self, node: NodeId) -> ValuePrecision {
            self.inner.initial_precision(node)
        }
        fn location(&self, state: &ValueState) -> NodeId {
            self.inner.location(state)
        }
        fn successors(
            &self,
            state: &ValueState,
            precision: &ValuePrecision,
            edge: &yabam::cfa::Edge,
        ) -> yabam::Result<Vec<ValueState>> {
            if edge.from == self.node {
                return Err(Error::domain("unsupported operation"));
            }
            self.inner.successors(state, precision, edge)
        }
        fn is_less_or_equal(&self, a: &ValueState, b: &ValueState) -> bool {
            self.inner.is_less_or_equal(a, b)
        }
        fn is_target(&self, state: &ValueState) -> bool {
            self.inner.is_target(state)
        }
        fn refine_precision(&self, a: &ValuePrecision, b: &ValuePrecision) -> ValuePrecision {
            self.inner.refine_precision(a, b)
        }
    }

    let (cfa, partitioning) = load("unsafe/deep_error");
    let inner = ValueAnalysis::new(Arc::clone(&cfa), Arc::clone(&partitioning));
    let analysis = FailsAt {
        inner,
        node: NodeId(20),
    };
    let mut bam = Bam::new(analysis, cfa, partitioning, Options::default()).unwrap();
    let err = bam.run_main().unwrap_err();
    let (block, source) = match err {
        Error::RecursiveAnalysisFailed { block, source } => (block, source),
        other => panic!("expected a wrapped error, got {other}"),
    };
    // reported by the innermost block, not rewrapped by `f`
    assert_eq!(block, "g");
    assert!(matches!(*source, Error::Domain { .. }), "{source}");
}
