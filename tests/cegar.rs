// SPDX-License-Identifier: BSD-3-Clause
// To debug a test, print `cegar.bam().dump()`

use std::path::Path;
use std::sync::Arc;

use yabam::domain::{ValueAnalysis, ValueRefiner};
use yabam::{cegar, Bam, BlockPartitioning, Cegar, Options, Program, Verdict};

// ------------------------------------------------------------------
// Helpers

fn cegar(
    path: &Path,
    opts: Options,
    max_refinements: usize,
) -> Cegar<ValueAnalysis, ValueRefiner> {
    let text = std::fs::read_to_string(path).unwrap();
    let program = match Program::from_json(&text) {
        Ok(p) => p,
        Err(e) => panic!("{}: {}", path.display(), e),
    };
    let partitioning = Arc::new(BlockPartitioning::new(
        &program.cfa,
        &program.loops,
        None,
    ));
    let cfa = Arc::new(program.cfa);
    let analysis = ValueAnalysis::new(Arc::clone(&cfa), Arc::clone(&partitioning));
    let bam = Bam::new(analysis, cfa, partitioning, opts).unwrap();
    Cegar::new(bam, ValueRefiner::new(), cegar::Options { max_refinements })
}

fn check(name: &str) -> (Verdict, Cegar<ValueAnalysis, ValueRefiner>) {
    let path = format!("tests/programs/{}.json", name);
    let mut cegar = cegar(Path::new(&path), Options::default(), 100);
    let verdict = cegar.check().unwrap();
    (verdict, cegar)
}

fn programs(dir: &str) -> Vec<std::path::PathBuf> {
    let mut paths: Vec<_> = std::fs::read_dir(format!("tests/programs/{}", dir))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |e| e == "json"))
        .collect();
    paths.sort();
    paths
}

// ------------------------------------------------------------------
// Tests

#[test]
fn safe_programs() {
    for aggressive in [true, false] {
        for path in programs("safe") {
            let opts = Options {
                aggressive_caching: aggressive,
                ..Options::default()
            };
            let verdict = cegar(&path, opts, 100).check().unwrap();
            assert_eq!(verdict, Verdict::Safe, "{}", path.display());
        }
    }
}

#[test]
fn unsafe_programs() {
    for path in programs("unsafe") {
        let verdict = cegar(&path, Options::default(), 100).check().unwrap();
        assert!(
            matches!(verdict, Verdict::Unsafe { .. }),
            "{}: {:?}",
            path.display(),
            verdict
        );
    }
}

#[test]
fn refined_constant() {
    let (verdict, cegar) = check("safe/refined_constant");
    assert_eq!(verdict, Verdict::Safe);
    assert_eq!(cegar.refinements(), 1);
    assert_eq!(cegar.reruns(), 0);
}

#[test]
fn error_path() {
    let (verdict, cegar) = check("unsafe/reachable_error");
    let Verdict::Unsafe { path } = verdict else {
        panic!("expected an error path");
    };
    let bam = cegar.bam();
    let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
    assert_eq!(locations, vec![0, 1, 10, 11]);
    assert!(bam.cfa().is_error(bam.location(path[3])));
    assert_eq!(cegar.refinements(), 0);
}

#[test]
fn two_call_sites_refined_once() {
    let (verdict, cegar) = check("safe/two_call_sites");
    assert_eq!(verdict, Verdict::Safe);
    assert_eq!(cegar.refinements(), 1);
    // the second call site no longer matches the first under `x`
    assert_eq!(cegar.bam().cache().stats().full_hits, 1);
}

#[test]
fn nothing_to_refine() {
    let (verdict, cegar) = check("safe/recursive");
    assert_eq!(verdict, Verdict::Safe);
    assert_eq!(cegar.refinements(), 0);
    assert_eq!(cegar.bam().stats().reconstructions, 0);
}

#[test]
fn refinement_budget() {
    let path = Path::new("tests/programs/safe/refined_constant.json");
    let mut cegar = cegar(path, Options::default(), 0);
    assert_eq!(cegar.check().unwrap(), Verdict::Unknown);
    assert_eq!(cegar.refinements(), 0);
}

#[test]
fn mutual_recursion_error_path() {
    let (verdict, cegar) = check("unsafe/mutual_recursion");
    let Verdict::Unsafe { path } = verdict else {
        panic!("expected an error path");
    };
    let bam = cegar.bam();
    let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
    assert_eq!(locations, vec![0, 10, 20, 21, 12, 99]);
}

#[test]
fn late_base_case_error_path() {
    for name in ["unsafe/late_base_case", "unsafe/mutual_recursion_late"] {
        let (verdict, cegar) = check(name);
        let Verdict::Unsafe { path } = verdict else {
            panic!("{name}: expected an error path");
        };
        let bam = cegar.bam();
        let locations: Vec<u32> = path.iter().map(|s| bam.location(*s).0).collect();
        assert_eq!(locations.first(), Some(&0), "{name}");
        assert_eq!(locations.last(), Some(&99), "{name}");
        // the error is only reachable once the base case returned
        assert!(locations.contains(&11), "{name}: {locations:?}");
        assert!(cegar.bam().stats().recursive_reruns >= 1, "{name}");
    }
}
