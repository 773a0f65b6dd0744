// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::adapters::FakeContainerRuntime;

fn fixture(ttl_ms: u64) -> (ContainerLeases, Arc<FakeContainerRuntime>) {
    let containers = Arc::new(FakeContainerRuntime::new());
    let leases =
        ContainerLeases::new(containers.clone(), Duration::from_millis(ttl_ms));
    (leases, containers)
}

fn starts(containers: &FakeContainerRuntime) -> usize {
    containers.calls.lock().iter().filter(|c| c.starts_with("start")).count()
}

fn stops(containers: &FakeContainerRuntime) -> usize {
    containers.calls.lock().iter().filter(|c| c.starts_with("stop")).count()
}

#[tokio::test]
async fn first_lease_starts_the_container_once() {
    let (leases, containers) = fixture(50);
    let project = Uuid::new_v4();
    let a = leases.acquire(project).await.unwrap();
    let b = leases.acquire(project).await.unwrap();
    assert_eq!(starts(&containers), 1);
    assert_eq!(leases.active_leases(project), 2);
    drop(a);
    drop(b);
}

#[tokio::test]
async fn container_stops_ttl_after_last_release() {
    let (leases, containers) = fixture(50);
    let project = Uuid::new_v4();
    let guard = leases.acquire(project).await.unwrap();
    drop(guard);
    assert_eq!(leases.active_leases(project), 0);

    // Not yet: the grace window is still open.
    assert_eq!(stops(&containers), 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(stops(&containers), 1);
}

#[tokio::test]
async fn reacquire_within_ttl_disarms_the_disposer() {
    let (leases, containers) = fixture(100);
    let project = Uuid::new_v4();
    drop(leases.acquire(project).await.unwrap());

    // Come back before the window closes.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let guard = leases.acquire(project).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(stops(&containers), 0, "disposer fired despite re-acquire");
    // The container was restarted on the 0→1 transition.
    assert_eq!(starts(&containers), 2);
    drop(guard);
}

#[tokio::test]
async fn holders_on_other_projects_are_independent()  {
    let (leases, containers) = fixture(30);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let guard_a = leases.acquire(a).await.unwrap();
    drop(leases.acquire(b).await.unwrap());

    tokio::time::sleep(Duration::from_millis(120)).await;
    // b was torn down, a is still held.
    assert_eq!(stops(&containers), 1);
    assert_eq!(leases.active_leases(a), 1);
    drop(guard_a);
}

#[tokio::test]
async fn failed_start_releases_the_lease() {
    let (leases, containers) = fixture(50);
    let project = Uuid::new_v4();
    *containers.fail_next.lock() = Some("no such image".into());
    let result = leases.acquire(project).await;
    assert!(result.is_err());
    assert_eq!(leases.active_leases(project), 0);

    // A later acquire works normally.
    let guard = leases.acquire(project).await.unwrap();
    assert_eq!(leases.active_leases(project), 1);
    drop(guard);
}
