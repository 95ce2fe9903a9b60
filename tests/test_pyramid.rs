// tests/test_pyramid.rs — Integration tests for the device pyramid builder.

mod common;

use common::{textured, Event, RecordingRuntime};
use vme_intra::geometry::{Dims, PyramidScale};
use vme_intra::image::Image;
use vme_intra::kernels::downsample_2x;
use vme_intra::pyramid::Pyramid;
use vme_intra::HostRuntime;

// ===== Level dimensions =====

#[test]
fn level_dims_halve_with_ceiling() {
    let cases = [
        (Dims::new(352, 288), [(352, 288), (176, 144), (88, 72), (44, 36)]),
        (Dims::new(33, 17), [(33, 17), (17, 9), (9, 5), (5, 3)]),
        (Dims::new(100, 75), [(100, 75), (50, 38), (25, 19), (13, 10)]),
        (Dims::new(1, 1), [(1, 1), (1, 1), (1, 1), (1, 1)]),
    ];
    for (full, expected) in cases {
        let mut rt = HostRuntime::new();
        let pyr = Pyramid::allocate(&mut rt, full, "src").unwrap();
        for (scale, (w, h)) in PyramidScale::FINE_TO_COARSE.into_iter().zip(expected) {
            assert_eq!(pyr.dims(scale), Dims::new(w, h), "{full} at {scale}");
            assert_eq!(scale.dims_for(full), Dims::new(w, h));
        }
    }
}

// ===== Contents =====

#[test]
fn rebuild_matches_chained_reference_downsample() {
    let frame = textured(100, 75, 0, 0);
    let mut rt = HostRuntime::new();
    let pyr = Pyramid::allocate(&mut rt, frame.dims(), "src").unwrap();
    pyr.upload(&mut rt, &frame).unwrap();
    pyr.rebuild(&mut rt).unwrap();

    let mut expected = frame.clone();
    for scale in PyramidScale::FINE_TO_COARSE {
        assert_eq!(pyr.read_level(&mut rt, scale).unwrap(), expected, "level {scale}");
        expected = downsample_2x(&expected);
    }
}

#[test]
fn rebuild_is_idempotent() {
    let frame = textured(64, 48, 3, 1);
    let mut rt = HostRuntime::new();
    let pyr = Pyramid::allocate(&mut rt, frame.dims(), "src").unwrap();
    pyr.upload(&mut rt, &frame).unwrap();

    pyr.rebuild(&mut rt).unwrap();
    let first: Vec<Image<u8>> =
        PyramidScale::FINE_TO_COARSE.iter().map(|&s| pyr.read_level(&mut rt, s).unwrap()).collect();
    pyr.rebuild(&mut rt).unwrap();
    let second: Vec<Image<u8>> =
        PyramidScale::FINE_TO_COARSE.iter().map(|&s| pyr.read_level(&mut rt, s).unwrap()).collect();

    assert_eq!(first, second);
}

#[test]
fn flat_frame_stays_flat_at_every_level() {
    let frame = Image::filled(45, 31, 77u8);
    let mut rt = HostRuntime::new();
    let pyr = Pyramid::allocate(&mut rt, frame.dims(), "src").unwrap();
    pyr.upload(&mut rt, &frame).unwrap();
    pyr.rebuild(&mut rt).unwrap();
    for scale in PyramidScale::FINE_TO_COARSE {
        let level = pyr.read_level(&mut rt, scale).unwrap();
        assert!(level.as_slice().iter().all(|&v| v == 77), "level {scale} not flat");
    }
}

// ===== Enqueue order =====

#[test]
fn rebuild_enqueues_fine_to_coarse() {
    let mut rt = RecordingRuntime::new();
    let pyr = Pyramid::allocate(&mut rt, Dims::new(64, 64), "src").unwrap();
    pyr.rebuild(&mut rt).unwrap();

    let ids: Vec<usize> = PyramidScale::FINE_TO_COARSE.iter().map(|&s| pyr.level(s).image.id()).collect();
    assert_eq!(
        rt.events,
        vec![
            Event::Downsample { src: ids[0], dst: ids[1] },
            Event::Downsample { src: ids[1], dst: ids[2] },
            Event::Downsample { src: ids[2], dst: ids[3] },
        ]
    );
    assert_eq!(rt.label_of(ids[3]), "src 8x");
}
