//! Partition repair driven through sweeps and acknowledgements, with lost
//! messages and nodes dying mid-repair

mod common;

use common::{app, Cluster};
use minimeta::common::{ConfigType, ConfigUpdateRequest, Error, Gpid, ProposalAction};

fn cluster() -> (Cluster, Gpid) {
    let cluster = Cluster::new(4);
    cluster.service.create_app(app(1, 1, 3)).unwrap();
    (cluster, Gpid::new(1, 0))
}

#[test]
fn test_upgrade_reissued_after_lost_message() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, None, &[&n[0], &n[1]]);

    let requests = c.sweep();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ConfigType::UpgradeToPrimary);
    assert_eq!(requests[0].node, n[0]);
    assert_eq!(requests[0].target, n[0]);
    assert_eq!(requests[0].config.ballot, 1);

    // nothing arrived, the next sweep asks again
    let again = c.sweep();
    assert_eq!(again, requests);

    let installed = c.ack(again[0].clone()).unwrap();
    assert_eq!(installed.primary, Some(n[0].clone()));
    assert_eq!(installed.secondaries, vec![n[1].clone()]);
    assert_eq!(installed.ballot, 2);
}

#[test]
fn test_upgrade_candidate_dies() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, None, &[&n[0], &n[1]]);

    let lost = c.sweep();
    assert_eq!(lost[0].node, n[0]);

    assert_eq!(c.service.set_node_state(&[n[0].clone()], false), 1);
    let pc = c.config(gpid);
    assert_eq!(pc.secondaries, vec![n[1].clone()]);
    assert_eq!(pc.ballot, 2);
    assert_eq!(pc.last_drops, vec![n[0].clone()]);

    let requests = c.sweep();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ConfigType::UpgradeToPrimary);
    assert_eq!(requests[0].node, n[1]);
    let installed = c.ack(requests[0].clone()).unwrap();
    assert_eq!(installed.primary, Some(n[1].clone()));
    assert_eq!(installed.ballot, 3);

    // the dead candidate's answer shows up late
    let err = c.ack(lost[0].clone()).unwrap_err();
    assert!(matches!(err, Error::StaleBallot { expected: 4, actual: 2, .. }));
    assert_eq!(c.config(gpid).primary, Some(n[1].clone()));
}

#[test]
fn test_add_secondary_reissued_after_lost_message() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, Some(&n[0]), &[&n[1]]);

    let requests = c.sweep();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ConfigType::AddSecondary);
    assert_eq!(requests[0].node, n[2]);
    assert_eq!(requests[0].target, n[0]);

    let again = c.sweep();
    assert_eq!(again, requests);

    let installed = c.ack(again[0].clone()).unwrap();
    assert_eq!(installed.secondaries, vec![n[1].clone(), n[2].clone()]);
    assert_eq!(installed.ballot, 2);
    assert!(c.sweep().is_empty());
}

#[test]
fn test_secondary_downgraded_by_replica() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, Some(&n[0]), &[&n[1]]);

    let requests = c.sweep();
    c.ack(requests[0].clone()).unwrap();
    assert_eq!(c.config(gpid).secondaries.len(), 2);

    // the primary kicks the new secondary out on its own
    let downgrade = ConfigUpdateRequest::from_action(
        &ProposalAction::new(n[0].clone(), n[2].clone(), ConfigType::DowngradeToInactive),
        &c.config(gpid),
    );
    let installed = c.ack(downgrade).unwrap();
    assert_eq!(installed.secondaries, vec![n[1].clone()]);
    assert_eq!(installed.ballot, 3);
    assert_eq!(installed.last_drops, vec![n[2].clone()]);

    c.settle();
    let pc = c.config(gpid);
    assert_eq!(pc.primary, Some(n[0].clone()));
    assert_eq!(pc.secondaries.len(), 2);
    assert_eq!(pc.ballot, 4);
    assert!(pc.last_drops.is_empty());
}

#[test]
fn test_added_secondary_dies_before_ack() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, Some(&n[0]), &[&n[1]]);

    let lost = c.sweep();
    assert_eq!(lost[0].node, n[2]);

    // not a member yet, nothing to downgrade
    assert_eq!(c.service.set_node_state(&[n[2].clone()], false), 0);

    let requests = c.sweep();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ConfigType::AddSecondary);
    assert_eq!(requests[0].node, n[3]);

    let installed = c.ack(requests[0].clone()).unwrap();
    assert_eq!(installed.secondaries, vec![n[1].clone(), n[3].clone()]);
}

#[test]
fn test_primary_dies() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, Some(&n[0]), &[&n[1], &n[2]]);
    assert!(c.sweep().is_empty());

    assert_eq!(c.service.set_node_state(&[n[0].clone()], false), 1);
    let pc = c.config(gpid);
    assert_eq!(pc.primary, None);
    assert_eq!(pc.ballot, 2);

    let requests = c.sweep();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ConfigType::UpgradeToPrimary);
    assert_eq!(requests[0].node, n[1]);
    c.ack(requests[0].clone()).unwrap();

    // back to full strength without the dead node
    c.settle();
    let pc = c.config(gpid);
    assert_eq!(pc.primary, Some(n[1].clone()));
    assert_eq!(pc.secondaries, vec![n[2].clone(), n[3].clone()]);
    assert_eq!(pc.ballot, 4);
    assert_eq!(pc.last_drops, vec![n[0].clone()]);
}

#[test]
fn test_no_alive_secondary_waits() {
    let (c, gpid) = cluster();
    let n = c.nodes.clone();
    c.set_config(gpid, 1, None, &[&n[0], &n[1]]);
    c.service.lock().view_mut().node_mut(&n[0]).set_alive(false);
    c.service.lock().view_mut().node_mut(&n[1]).set_alive(false);

    let report = c.service.check_all_partitions();
    assert_eq!(report.unrecoverable, 1);
    assert!(report.requests.is_empty());
    assert_eq!(c.transport.sent_count(), 0);
}
