use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camrig_lib::core::settings::RigSettings;
use camrig_lib::device::{FaultPlan, SyntheticBackend};
use camrig_lib::session::{
    camera_link, compose_side_by_side, CloseChoice, CloseOutcome, Event, Notice, RemuxError,
    RemuxJob, Remuxer, RigCoordinator, UiController,
};

const WAIT: Duration = Duration::from_secs(10);

fn copy_remuxer() -> Arc<dyn Remuxer> {
    Arc::new(|job: &RemuxJob| {
        std::fs::copy(&job.input, &job.output)
            .map(|_| ())
            .map_err(|e| RemuxError::Launch(e.to_string()))
    })
}

fn dual_rig(backend: SyntheticBackend) -> RigCoordinator {
    let mut configs = RigSettings::default()
        .with_camera_count(2)
        .unwrap()
        .camera_configs();
    for config in &mut configs {
        config.preview_size.width = 32;
        config.preview_size.height = 18;
        config.frame_rate = 50;
    }
    RigCoordinator::spawn(configs, Arc::new(backend), copy_remuxer(), |_| None).unwrap()
}

/// Poll until `done` holds, returning every notice seen on the way.
fn poll_until(rig: &mut RigCoordinator, mut done: impl FnMut(&RigCoordinator) -> bool) -> Vec<Notice> {
    let deadline = Instant::now() + WAIT;
    let mut notices = Vec::new();
    loop {
        notices.extend(rig.poll());
        if done(rig) {
            return notices;
        }
        assert!(Instant::now() < deadline, "rig never reached the expected state: {:?}", rig.views());
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_record_waits_for_every_camera_ready() {
    let (link0, ends0) = camera_link(0, "cam0");
    let (link1, ends1) = camera_link(1, "cam1");
    let mut rig = RigCoordinator::from_links(vec![link0, link1]);

    ends0.events.send(Event::Status("preview running".into())).unwrap();
    ends0.events.send(Event::Ready).unwrap();
    rig.poll();
    assert!(!rig.controls().record_enabled);
    assert!(rig.record(Path::new("/videos"), "stamp").is_none());
    assert!(ends0.commands.try_recv().is_err());

    ends1.events.send(Event::Ready).unwrap();
    rig.poll();
    assert!(rig.controls().record_enabled);
}

#[test]
fn test_both_cameras_record_and_save() {
    let tmp = tempfile::tempdir().unwrap();
    let mut rig = dual_rig(SyntheticBackend::new());

    poll_until(&mut rig, |r| r.controls().record_enabled);
    let paths = rig.record(tmp.path(), "20250114_093012").unwrap();
    assert_eq!(paths.len(), 2);
    assert!(!rig.controls().record_enabled);

    poll_until(&mut rig, |r| r.views().iter().all(|v| v.recording));
    assert!(rig.controls().stop_enabled);

    assert!(rig.stop());
    let notices = poll_until(&mut rig, |r| r.controls().record_enabled);

    let saved: Vec<_> = notices
        .iter()
        .filter_map(|n| match n {
            Notice::Saved { path, .. } => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(saved.len(), 2);
    for p in &paths {
        assert!(p.container.exists());
        assert!(!p.elementary.exists());
        assert!(saved.contains(&p.container));
    }

    let frames: Option<Vec<_>> = rig.latest_frames().into_iter().collect();
    let composed = compose_side_by_side(&frames.unwrap(), 4).unwrap();
    assert_eq!(composed.dimensions(), (32 * 2 + 4, 18));

    rig.shutdown();
    rig.join_workers();
}

#[test]
fn test_one_camera_failing_to_start_leaves_the_other_recording() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_faults(
        1,
        FaultPlan {
            fail_start_encoding: true,
            ..Default::default()
        },
    );
    let mut rig = dual_rig(backend);

    poll_until(&mut rig, |r| r.controls().record_enabled);
    rig.record(tmp.path(), "partial").unwrap();

    let notices = poll_until(&mut rig, |r| {
        r.views()[0].recording && r.views()[1].ready
    });
    assert!(notices
        .iter()
        .any(|n| matches!(n, Notice::Alert { camera_id: 1, .. })));
    assert!(rig.controls().stop_enabled);
    assert!(!rig.controls().record_enabled);

    rig.stop();
    poll_until(&mut rig, |r| r.controls().record_enabled);
    assert!(tmp.path().join("cam0_partial.mp4").exists());
    assert!(!tmp.path().join("cam1_partial.mp4").exists());

    rig.shutdown();
    rig.join_workers();
}

#[test]
fn test_fatal_camera_closes_the_rig() {
    let backend = SyntheticBackend::new().with_faults(
        1,
        FaultPlan {
            fail_open: true,
            ..Default::default()
        },
    );
    let rig = dual_rig(backend);
    let mut ui = UiController::new(rig, std::env::temp_dir());

    let deadline = Instant::now() + WAIT;
    let mut fatal_seen = false;
    loop {
        let outcome = ui.poll();
        fatal_seen |= outcome
            .notices
            .iter()
            .any(|n| matches!(n, Notice::Fatal { camera_id: 1, .. }));
        if outcome.exit {
            break;
        }
        assert!(Instant::now() < deadline, "rig never closed");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(fatal_seen);
    assert!(!ui.controls().record_enabled);
    ui.finish();
}

#[test]
fn test_save_and_quit_waits_for_both_files() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ui = UiController::new(dual_rig(SyntheticBackend::new()), tmp.path());

    let deadline = Instant::now() + WAIT;
    while !ui.controls().record_enabled {
        ui.poll();
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }
    let paths = ui.record().unwrap().unwrap();
    while !ui.is_recording() {
        ui.poll();
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }

    let mut save = || CloseChoice::SaveAndQuit;
    assert_eq!(ui.close(&mut save), CloseOutcome::Deferred);

    while !ui.poll().exit {
        assert!(Instant::now() < deadline, "close never completed");
        std::thread::sleep(Duration::from_millis(10));
    }
    ui.finish();

    for p in paths {
        assert!(p.container.exists(), "{} missing", p.container.display());
    }
}
