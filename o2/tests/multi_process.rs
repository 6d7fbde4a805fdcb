//! Cross-process integration tests: each `#[test]` here runs two or more
//! real `O2` instances, bound to loopback/ephemeral sockets within this one
//! test binary, and polls them by hand until the property under test holds
//! or a timeout elapses. Distinct discovery ports per test keep
//! concurrently-running tests from seeing each other's broadcasts.

mod common;

use std::time::Duration;

use common::{make_master_candidate, poll_until, spawn};
use o2::Status;

/// Two processes discover each other and a remote service's status climbs
/// from `FAIL` to `REMOTE_NOTIME` to `REMOTE` as discovery completes and the
/// clock synchronizes.
#[test]
fn two_process_discovery_status_transitions() {
    let mut p1 = spawn("ens-discovery", 39201);
    let mut p2 = spawn("ens-discovery", 39201);

    make_master_candidate(&mut p2);
    p2.add_service("svc-on-p2");

    assert_eq!(p1.status("svc-on-p2"), Status::Fail);

    let saw_remote_notime = poll_until(&mut [&mut p1, &mut p2], Duration::from_secs(5), |insts| {
        insts[0].status("svc-on-p2") >= Status::RemoteNoTime
    });
    assert!(saw_remote_notime, "p1 never discovered svc-on-p2");

    let saw_synced = poll_until(&mut [&mut p1, &mut p2], Duration::from_secs(5), |insts| {
        insts[0].status("svc-on-p2") == Status::Remote
    });
    assert!(saw_synced, "p1 never reported svc-on-p2 as synced");
}

/// Once a peer's connection is gone, its services fail status and sends to
/// them are rejected, within a bounded time.
#[test]
fn peer_loss_tears_down_its_services() {
    let mut p1 = spawn("ens-peer-loss", 39202);
    let mut p2 = spawn("ens-peer-loss", 39202);
    p2.add_service("svc-on-p2");

    let discovered = poll_until(&mut [&mut p1, &mut p2], Duration::from_secs(5), |insts| {
        insts[0].status("svc-on-p2") != Status::Fail
    });
    assert!(discovered, "p1 never discovered svc-on-p2");

    p2.finish();

    let mut p1_only = [&mut p1];
    let lost = poll_until(&mut p1_only, Duration::from_secs(2), |insts| insts[0].status("svc-on-p2") == Status::Fail);
    assert!(lost, "p1 never noticed svc-on-p2's peer was lost");
}

/// Any number of simultaneously-started master candidates converge, within
/// bounded time, on the single candidate with the lowest `peer_id`.
#[test]
fn master_election_converges_on_lowest_peer_id() {
    let mut a = spawn("ens-election", 39203);
    let mut b = spawn("ens-election", 39203);
    let mut c = spawn("ens-election", 39203);
    make_master_candidate(&mut a);
    make_master_candidate(&mut b);
    make_master_candidate(&mut c);

    let expected_master = [a.peer_id().clone(), b.peer_id().clone(), c.peer_id().clone()]
        .into_iter()
        .min()
        .unwrap();

    let converged = poll_until(&mut [&mut a, &mut b, &mut c], Duration::from_secs(5), |insts| {
        insts.iter().filter(|o| o.is_master()).count() == 1
    });
    assert!(converged, "the ensemble never settled on exactly one master");

    let master_count = [&a, &b, &c].iter().filter(|o| o.is_master()).count();
    assert_eq!(master_count, 1);
    for o in [&a, &b, &c] {
        if o.is_master() {
            assert_eq!(*o.peer_id(), expected_master, "the wrong candidate won the election");
        }
    }
}

/// `global_time()` never goes backwards across two observations, including
/// while `skew` is actively slewing toward a freshly-adopted offset right
/// after the first sync.
#[test]
fn global_time_is_monotone_after_sync() {
    let mut master = spawn("ens-monotone", 39204);
    let mut follower = spawn("ens-monotone", 39204);
    make_master_candidate(&mut master);

    let synced = poll_until(&mut [&mut master, &mut follower], Duration::from_secs(5), |insts| {
        insts[1].global_time() >= 0.0
    });
    assert!(synced, "follower never synchronized its clock");

    let mut last = follower.global_time();
    for _ in 0..200 {
        let _ = follower.poll();
        let now = follower.global_time();
        assert!(now >= last, "global_time() went backwards: {now} < {last}");
        last = now;
        std::thread::sleep(Duration::from_millis(2));
    }
}
