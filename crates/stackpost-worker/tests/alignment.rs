//! End-to-end alignment runs over files in a temporary directory.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use stackpost_pipeline::{AlignmentMethod, Mono32FImage};
use stackpost_worker::image_io::{load_mono, save_mono16};
use stackpost_worker::{
    AbortReason, AlignmentEngine, AlignmentRun, CompletionStatus, OutputPolicy, ProgressEvent,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Smooth blob field with a bright spot, shifted by whole pixels.
fn textured_frame(shift_x: f32, shift_y: f32) -> Mono32FImage {
    Mono32FImage::from_fn(64, 64, |x, y| {
        let (fx, fy) = (x as f32 - shift_x, y as f32 - shift_y);
        let blob = |cx: f32, cy: f32, s: f32| (-((fx - cx).powi(2) + (fy - cy).powi(2)) / s).exp();
        image::Luma([0.1 + 0.5 * blob(30.0, 28.0, 18.0) + 0.3 * blob(20.0, 40.0, 30.0)])
    })
}

fn disc_frame(cx: f32, cy: f32, radius: f32) -> Mono32FImage {
    Mono32FImage::from_fn(80, 80, |x, y| {
        let mut covered = 0;
        for sy in 0..4 {
            for sx in 0..4 {
                let px = x as f32 + (sx as f32 + 0.5) / 4.0 - 0.5;
                let py = y as f32 + (sy as f32 + 0.5) / 4.0 - 0.5;
                if (px - cx).hypot(py - cy) < radius {
                    covered += 1;
                }
            }
        }
        image::Luma([0.1 + 0.8 * covered as f32 / 16.0])
    })
}

fn write_frames(dir: &Path, frames: &[Mono32FImage]) -> Vec<PathBuf> {
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let path = dir.join(format!("frame_{i}.png"));
            save_mono16(frame, &path).unwrap();
            path
        })
        .collect()
}

fn recording_engine() -> (AlignmentEngine, Rc<RefCell<Vec<ProgressEvent>>>) {
    let mut engine = AlignmentEngine::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    engine.set_progress_handler(move |_, event| sink.borrow_mut().push(event.clone()));
    (engine, events)
}

#[test]
fn phase_correlation_event_sequence() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..5).map(|i| textured_frame(i as f32, 0.0)).collect();
    let inputs = write_frames(dir.path(), &frames);
    let out = dir.path().join("aligned");

    let (mut engine, events) = recording_engine();
    engine
        .start(AlignmentRun {
            inputs: inputs.clone(),
            method: AlignmentMethod::PhaseCorrelation,
            output: OutputPolicy::new(&out),
        })
        .unwrap();
    assert_eq!(engine.wait(), Some(CompletionStatus::Completed));
    assert!(!engine.is_running());

    let events = events.borrow();
    assert_eq!(events.len(), 4 + 5 + 1);
    for (i, event) in events[..4].iter().enumerate() {
        let ProgressEvent::TranslationComputed {
            index,
            total,
            translation,
        } = event
        else {
            panic!("expected TranslationComputed, got {event:?}");
        };
        assert_eq!((*index, *total), (i + 1, 4));
        assert!(
            (translation.dx - (i + 1) as f32).abs() < 0.5,
            "frame {index}: cumulative dx {}",
            translation.dx
        );
    }
    for (i, event) in events[4..9].iter().enumerate() {
        let ProgressEvent::ImageSaved { index, total, path } = event else {
            panic!("expected ImageSaved, got {event:?}");
        };
        assert_eq!((*index, *total), (i, 5));
        assert_eq!(*path, out.join(format!("frame_{i}_aligned.png")));
        assert!(path.exists());
    }
    assert_eq!(events[9], ProgressEvent::Completed);

    let summary = engine.summary().unwrap();
    assert_eq!(summary.frames.len(), 5);
    assert!(summary.skipped.is_empty());

    // Interior content of the last aligned frame matches the first frame.
    let aligned = load_mono(&summary.frames[4].path).unwrap();
    let (a, b) = (aligned.get_pixel(30, 28).0[0], frames[0].get_pixel(30, 28).0[0]);
    assert!((a - b).abs() < 0.05, "aligned {a} vs reference {b}");
}

#[test]
fn limb_run_skips_flat_frame() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let frames = vec![
        disc_frame(40.0, 40.0, 14.0),
        Mono32FImage::from_pixel(80, 80, image::Luma([0.3])),
        disc_frame(43.0, 38.0, 14.0),
    ];
    let inputs = write_frames(dir.path(), &frames);

    let (mut engine, events) = recording_engine();
    engine
        .start(AlignmentRun {
            inputs,
            method: AlignmentMethod::Limb,
            output: OutputPolicy::new(dir.path().join("out")).with_suffix("_stab"),
        })
        .unwrap();
    assert_eq!(engine.wait(), Some(CompletionStatus::Completed));

    let events = events.borrow();
    let radii: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::DiscRadiusFound { index, radius, .. } => Some((*index, *radius)),
            _ => None,
        })
        .collect();
    assert_eq!(radii.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 2]);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::StabilizationFailure { index: 1, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::AverageRadiusUsed { radius } if (radius - 14.0).abs() < 0.5
    )));

    let summary = engine.summary().unwrap();
    assert_eq!(summary.skipped, vec![1]);
    let indices: Vec<_> = summary.frames.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 2]);
    let shift = summary.frames[1].shift;
    assert!((shift.dx + 3.0).abs() < 0.5, "dx {}", shift.dx);
    assert!((shift.dy - 2.0).abs() < 0.5, "dy {}", shift.dy);
    assert!(summary.frames[1].path.ends_with("frame_2_stab.png"));
}

#[test]
fn limb_run_without_any_disc_fails() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let flat = Mono32FImage::from_pixel(32, 32, image::Luma([0.5]));
    let inputs = write_frames(dir.path(), &[flat.clone(), flat]);

    let (mut engine, events) = recording_engine();
    engine
        .start(AlignmentRun {
            inputs,
            method: AlignmentMethod::Limb,
            output: OutputPolicy::new(dir.path()),
        })
        .unwrap();
    assert_eq!(engine.wait(), Some(CompletionStatus::Aborted));
    assert!(matches!(engine.abort_reason(), Some(AbortReason::Failed(_))));

    let terminals = events.borrow().iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal event");
}

#[test]
fn mismatched_frame_sizes_fail_phase_correlation() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_frames(
        dir.path(),
        &[
            textured_frame(0.0, 0.0),
            Mono32FImage::from_pixel(16, 16, image::Luma([0.2])),
        ],
    );

    let (mut engine, events) = recording_engine();
    engine
        .start(AlignmentRun {
            inputs,
            method: AlignmentMethod::PhaseCorrelation,
            output: OutputPolicy::new(dir.path().join("out")),
        })
        .unwrap();
    assert_eq!(engine.wait(), Some(CompletionStatus::Aborted));
    assert!(matches!(
        events.borrow().last(),
        Some(ProgressEvent::Aborted {
            reason: AbortReason::Failed(_)
        })
    ));
}

#[test]
fn aborting_a_long_run_ends_with_one_aborted_event() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let frame = textured_frame(0.0, 0.0);
    let inputs: Vec<_> = write_frames(dir.path(), std::slice::from_ref(&frame))
        .into_iter()
        .cycle()
        .take(400)
        .collect();

    let (mut engine, events) = recording_engine();
    engine
        .start(AlignmentRun {
            inputs,
            method: AlignmentMethod::PhaseCorrelation,
            output: OutputPolicy::new(dir.path().join("out")),
        })
        .unwrap();
    assert_eq!(engine.abort(), Some(CompletionStatus::Aborted));
    assert_eq!(engine.abort(), None);

    assert!(!engine.is_running());
    assert_eq!(engine.abort_reason(), Some(&AbortReason::Cancelled));
    let events = events.borrow();
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Aborted {
            reason: AbortReason::Cancelled
        })
    );
}
