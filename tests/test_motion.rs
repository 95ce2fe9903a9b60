// tests/test_motion.rs — Hierarchical motion estimation: pass order, seed
// chaining and the vectors it finds.

mod common;

use std::collections::HashSet;

use common::{moving_sequence, textured, Event, RecordingRuntime};
use vme_intra::geometry::{Dims, PyramidScale};
use vme_intra::motion::{MotionEstimator, SeedPolicy};
use vme_intra::pyramid::Pyramid;
use vme_intra::runtime::{ComputeRuntime, SearchParams};
use vme_intra::HostRuntime;

fn params() -> SearchParams {
    SearchParams { qp: 12, search_range: 4 }
}

/// Allocate, upload and rebuild a source/reference pyramid pair.
fn pyramids<R: ComputeRuntime>(
    rt: &mut R,
    src: &vme_intra::image::Image<u8>,
    reference: &vme_intra::image::Image<u8>,
) -> (Pyramid<R>, Pyramid<R>) {
    let s = Pyramid::allocate(rt, src.dims(), "source").unwrap();
    let r = Pyramid::allocate(rt, reference.dims(), "reference").unwrap();
    s.upload(rt, src).unwrap();
    r.upload(rt, reference).unwrap();
    s.rebuild(rt).unwrap();
    r.rebuild(rt).unwrap();
    (s, r)
}

// ===== Ordering and seeding =====

#[test]
fn passes_run_coarse_to_fine() {
    let frames = moving_sequence(96, 64, 2, 2);
    let mut rt = RecordingRuntime::new();
    let (s, r) = pyramids(&mut rt, &frames[1], &frames[0]);
    let est = MotionEstimator::allocate(&mut rt, s.dims(PyramidScale::Full), SeedPolicy::Unseeded).unwrap();
    rt.events.clear();

    est.estimate(&mut rt, &s, &r, params()).unwrap();

    let scales: Vec<PyramidScale> = rt
        .motion_events()
        .iter()
        .map(|e| match e {
            Event::Motion { scale, .. } => *scale,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(scales, PyramidScale::COARSE_TO_FINE.to_vec());
}

#[test]
fn each_finer_pass_is_seeded_by_the_previous_output() {
    let frames = moving_sequence(96, 64, 2, 2);
    let mut rt = RecordingRuntime::new();
    let (s, r) = pyramids(&mut rt, &frames[1], &frames[0]);
    let est = MotionEstimator::allocate(&mut rt, s.dims(PyramidScale::Full), SeedPolicy::Unseeded).unwrap();
    rt.events.clear();

    est.estimate(&mut rt, &s, &r, params()).unwrap();

    let passes: Vec<(Option<usize>, usize)> = rt
        .motion_events()
        .iter()
        .map(|e| match e {
            Event::Motion { seed, out, .. } => (*seed, *out),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(passes.len(), 4);
    assert_eq!(passes[0].0, None, "coarsest pass must be unseeded");
    for w in passes.windows(2) {
        assert_eq!(w[1].0, Some(w[0].1), "seed must be the previous pass's output");
    }
    // Every level writes its own field.
    let outs: HashSet<usize> = passes.iter().map(|p| p.1).collect();
    assert_eq!(outs.len(), 4);
}

#[test]
fn passes_read_matching_levels_of_both_pyramids() {
    let frames = moving_sequence(64, 64, 2, 1);
    let mut rt = RecordingRuntime::new();
    let (s, r) = pyramids(&mut rt, &frames[1], &frames[0]);
    let est = MotionEstimator::allocate(&mut rt, s.dims(PyramidScale::Full), SeedPolicy::Unseeded).unwrap();
    rt.events.clear();

    est.estimate(&mut rt, &s, &r, params()).unwrap();

    for e in rt.motion_events() {
        if let Event::Motion { scale, src, reference, .. } = e {
            assert_eq!(*src, s.level(*scale).image.id());
            assert_eq!(*reference, r.level(*scale).image.id());
        }
    }
}

#[test]
fn zero_filled_seed_is_bound_and_matches_unseeded() {
    let frames = moving_sequence(80, 48, 2, 3);

    let mut rt = RecordingRuntime::new();
    let (s, r) = pyramids(&mut rt, &frames[1], &frames[0]);
    let zero = MotionEstimator::allocate(&mut rt, s.dims(PyramidScale::Full), SeedPolicy::ZeroFilled).unwrap();
    let plain = MotionEstimator::allocate(&mut rt, s.dims(PyramidScale::Full), SeedPolicy::Unseeded).unwrap();
    rt.events.clear();

    let zf = zero.estimate(&mut rt, &s, &r, params()).unwrap();
    let zero_full = rt.read_motion_field(zf).unwrap();
    match rt.motion_events()[0] {
        Event::Motion { seed, .. } => assert!(seed.is_some(), "zero-filled policy binds a seed"),
        _ => unreachable!(),
    }

    let pf = plain.estimate(&mut rt, &s, &r, params()).unwrap();
    let plain_full = rt.read_motion_field(pf).unwrap();
    assert_eq!(zero_full, plain_full);
}

// ===== Vectors =====

#[test]
fn finds_global_translation() {
    // Source is the reference content moved right by 6 and down by 2, so
    // each source block matches the reference at (-6, -2).
    let reference = textured(128, 96, 0, 0);
    let src = textured(128, 96, 6, 2);
    let mut rt = HostRuntime::new();
    let (s, r) = pyramids(&mut rt, &src, &reference);
    let est = MotionEstimator::allocate(&mut rt, src.dims(), SeedPolicy::Unseeded).unwrap();

    let field = est.estimate(&mut rt, &s, &r, SearchParams { qp: 0, search_range: 4 }).unwrap();
    let hyps = rt.read_motion_field(field).unwrap();

    let grid = est.grid(PyramidScale::Full);
    assert_eq!(hyps.len(), grid.len());
    // Interior blocks see no clamped border pixels.
    for by in 1..grid.rows - 1 {
        for bx in 1..grid.cols - 1 {
            let h = hyps[grid.index(bx, by)];
            assert_eq!((h.mv_x, h.mv_y, h.sad), (-6, -2, 0), "block ({bx},{by})");
        }
    }
}

#[test]
fn identical_frames_give_zero_field() {
    let frame = textured(50, 40, 0, 0);
    let mut rt = HostRuntime::new();
    let (s, r) = pyramids(&mut rt, &frame, &frame);
    let est = MotionEstimator::allocate(&mut rt, Dims::new(50, 40), SeedPolicy::Unseeded).unwrap();
    let field = est.estimate(&mut rt, &s, &r, params()).unwrap();
    let hyps = rt.read_motion_field(field).unwrap();
    assert_eq!(hyps.len(), 4 * 3);
    assert!(hyps.iter().all(|h| h.mv_x == 0 && h.mv_y == 0 && h.sad == 0));
}
