mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use common::{kernel_with, project, quick_settings, FakeDevice};
use plotter_app_core::SyncEvent;
use plotter_core::{DeviceState, DeviceStatus};

fn observed(sequence: u64, state: DeviceState) -> DeviceStatus {
    DeviceStatus {
        state,
        progress: None,
        observed_at: Utc::now(),
        sequence,
    }
}

#[tokio::test]
async fn late_status_responses_do_not_overwrite_newer_ones() {
    let mut kernel = kernel_with(FakeDevice::new(), quick_settings());
    let tx = kernel.sender();

    tx.send(SyncEvent::StatusReceived(observed(5, DeviceState::Paused)))
        .await
        .unwrap();
    tx.send(SyncEvent::StatusReceived(observed(3, DeviceState::Running)))
        .await
        .unwrap();
    assert_eq!(kernel.tick(), 2);

    let state = kernel.state();
    assert_eq!(state.status.state, DeviceState::Paused);
    assert_eq!(state.last_sequence, 5);
}

#[tokio::test]
async fn project_events_for_a_replaced_selection_are_ignored() {
    let device = FakeDevice::new().with_project("b", "Current");
    let mut kernel = kernel_with(device, quick_settings());
    kernel.select_project(Some("a".into()));
    kernel.select_project(Some("b".into()));

    let tx = kernel.sender();
    tx.send(SyncEvent::ProjectLoaded {
        project: project("a", "Stale"),
        revision: u64::MAX,
    })
    .await
    .unwrap();
    kernel.tick();

    let state = kernel.state();
    assert_eq!(state.active_project_id.as_deref(), Some("b"));
    assert_ne!(
        state.active_project.as_ref().map(|p| p.id.as_str()),
        Some("a")
    );

    let state = tokio::time::timeout(
        common::WAIT,
        kernel.run_until(|s| s.active_project.is_some()),
    )
    .await
    .unwrap();
    assert_eq!(state.active_project.as_ref().map(|p| p.name.as_str()), Some("Current"));
}

#[tokio::test]
async fn slow_project_fetch_never_replaces_a_newer_one() {
    let device = FakeDevice::new().with_project("p1", "Spiral");
    device.delay_next_project_fetch(Duration::from_millis(200));
    let mut kernel = kernel_with(device, quick_settings());

    // the selection fetch reads the empty image list, then stalls
    kernel.select_project(Some("p1".into()));
    tokio::time::timeout(common::WAIT, async {
        while kernel.api().project_fetches.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    kernel.api().add_image("p1", "new.png");
    kernel.refresh_active_project();
    tokio::time::timeout(common::WAIT, kernel.run_until(|s| s.active_project.is_some()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    kernel.tick();

    let state = kernel.state();
    assert_eq!(kernel.api().project_fetches.load(Ordering::SeqCst), 2);
    assert_eq!(
        state.active_project.as_ref().map(|p| p.image_refs.clone()),
        Some(vec!["new.png".to_string()])
    );
    assert_eq!(state.project_revision, 2);
}
