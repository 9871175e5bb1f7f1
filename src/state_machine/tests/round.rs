use std::{path::PathBuf, sync::Arc, time::Duration};

use tempfile::TempDir;

use crate::{
    aggregator::GlobalAggregate,
    estimator::SiteContribution,
    settings::{RoundSettings, SitesSettings},
    sites::{LocalSite, Site, SiteId, GLOBAL_RESULT_FILE, LOCAL_RESULT_FILE},
    state_machine::{
        abort::AbortHandle,
        events::{AggregateUpdate, EventSubscriber},
        phases::PhaseName,
        tests::utils::{enable_logging, parameters, round_settings, sites, Behavior, TestSite},
        DistributionIncomplete,
        RoundError,
        RoundInitializer,
        StateMachine,
    },
};

fn init(
    settings: RoundSettings,
    test_sites: &[Arc<TestSite>],
) -> (StateMachine, AbortHandle, EventSubscriber) {
    RoundInitializer::new(settings, parameters(), sites(test_sites)).init()
}

fn ids(ids: &[&str]) -> Vec<SiteId> {
    ids.iter().map(|id| SiteId::from(*id)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_round_success() {
    enable_logging();
    let site_1 = TestSite::new("site-1", Behavior::respond(10));
    let site_2 = TestSite::new("site-2", Behavior::respond_after(1200, 30));
    let (state_machine, _abort, events) = init(round_settings(), &[site_1.clone(), site_2.clone()]);
    assert_eq!(state_machine.phase(), PhaseName::Init);

    let outcome = state_machine.run().await.unwrap();
    assert_eq!(outcome.contributors, ids(&["site-1", "site-2"]));
    assert_eq!(outcome.acknowledged, ids(&["site-1", "site-2"]));
    assert!(outcome.incomplete.is_none());
    assert_eq!(outcome.aggregate.counts, vec![10, 30]);
    assert_eq!(outcome.aggregate.mean_matrix.dim(), 3);
    for value in outcome.aggregate.mean_matrix.upper_triangle() {
        assert!((value - 0.5).abs() < 1e-9);
    }

    assert_eq!(events.phase_listener().get_latest(), PhaseName::Done);
    match events.aggregate_listener().get_latest() {
        AggregateUpdate::New(aggregate) => assert_eq!(*aggregate, outcome.aggregate),
        AggregateUpdate::Invalidate => panic!("the aggregate was not published"),
    }
    assert_eq!(site_1.accepted().as_deref(), Some(&outcome.aggregate));
    assert_eq!(site_2.accepted().as_deref(), Some(&outcome.aggregate));
}

#[tokio::test(start_paused = true)]
async fn test_round_quorum_failure_on_timeout() {
    enable_logging();
    let settings = RoundSettings {
        min_clients: 3,
        timeout: 5,
        ..round_settings()
    };
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::respond(20)),
        TestSite::new("site-3", Behavior::Silent),
    ];
    let (state_machine, _abort, events) = init(settings, &test_sites);

    let err = state_machine.run().await.unwrap_err();
    assert!(matches!(
        err,
        RoundError::QuorumFailure {
            phase: PhaseName::Collecting,
            accepted: 2,
            required: 3,
        }
    ));
    assert_eq!(events.phase_listener().get_latest(), PhaseName::Failure);
    assert_eq!(
        events.aggregate_listener().get_latest(),
        AggregateUpdate::Invalidate
    );
}

#[tokio::test(start_paused = true)]
async fn test_round_quorum_failure_without_timeout() {
    enable_logging();
    let settings = RoundSettings {
        min_clients: 3,
        ..round_settings()
    };
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::respond(20)),
    ];
    let (state_machine, _abort, _events) = init(settings, &test_sites);

    // every site responded, so the round ends although no timeout is set
    let err = state_machine.run().await.unwrap_err();
    assert!(matches!(
        err,
        RoundError::QuorumFailure {
            phase: PhaseName::Collecting,
            accepted: 2,
            required: 3,
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_round_rejects_empty_contribution() {
    enable_logging();
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::respond(20)),
        TestSite::new("site-3", Behavior::respond(0)),
    ];
    let (state_machine, _abort, _events) = init(round_settings(), &test_sites);

    let outcome = state_machine.run().await.unwrap();
    assert_eq!(outcome.contributors, ids(&["site-1", "site-2"]));
    assert_eq!(outcome.aggregate.counts, vec![10, 20]);
    assert_eq!(outcome.acknowledged, ids(&["site-1", "site-2", "site-3"]));
}

#[tokio::test(start_paused = true)]
async fn test_round_site_error_fails_round() {
    enable_logging();
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::Fail),
        TestSite::new("site-3", Behavior::respond(30)),
    ];
    let (state_machine, _abort, _events) = init(round_settings(), &test_sites);

    match state_machine.run().await {
        Err(RoundError::SiteResult { site, phase, .. }) => {
            assert_eq!(site, SiteId::from("site-2"));
            assert_eq!(phase, PhaseName::Collecting);
        }
        other => panic!("unexpected round result: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_round_ignores_site_error() {
    enable_logging();
    let settings = RoundSettings {
        ignore_result_error: true,
        ..round_settings()
    };
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::Fail),
        TestSite::new("site-3", Behavior::respond(30)),
    ];
    let (state_machine, _abort, _events) = init(settings, &test_sites);

    let outcome = state_machine.run().await.unwrap();
    assert_eq!(outcome.contributors, ids(&["site-1", "site-3"]));
    assert_eq!(outcome.aggregate.counts, vec![10, 30]);
    assert_eq!(outcome.acknowledged, ids(&["site-1", "site-3"]));
    assert!(outcome.incomplete.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_round_aborted_before_start() {
    enable_logging();
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::respond(20)),
    ];
    let (state_machine, abort, events) = init(round_settings(), &test_sites);
    abort.abort();

    let err = state_machine.run().await.unwrap_err();
    assert!(matches!(
        err,
        RoundError::Aborted {
            phase: PhaseName::Init
        }
    ));
    assert_eq!(events.phase_listener().get_latest(), PhaseName::Aborted);
    assert!(test_sites.iter().all(|site| site.accepted().is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_round_aborted_while_collecting() {
    enable_logging();
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::Silent),
    ];
    let (state_machine, abort, events) = init(round_settings(), &test_sites);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        abort.abort();
    });

    let err = state_machine.run().await.unwrap_err();
    assert!(matches!(
        err,
        RoundError::Aborted {
            phase: PhaseName::Collecting
        }
    ));
    assert_eq!(events.phase_listener().get_latest(), PhaseName::Aborted);
    assert_eq!(
        events.aggregate_listener().get_latest(),
        AggregateUpdate::Invalidate
    );
}

#[tokio::test(start_paused = true)]
async fn test_round_distribution_incomplete() {
    enable_logging();
    // a site failing to accept the aggregate never fails the round
    assert!(!round_settings().ignore_result_error);
    let site_1 = TestSite::new("site-1", Behavior::respond(10));
    let site_2 = TestSite::new("site-2", Behavior::FailOnAccept { count: 20 });
    let (state_machine, _abort, events) =
        init(round_settings(), &[site_1.clone(), site_2.clone()]);

    let outcome = state_machine.run().await.unwrap();
    assert_eq!(outcome.contributors, ids(&["site-1", "site-2"]));
    assert_eq!(outcome.acknowledged, ids(&["site-1"]));
    assert_eq!(
        outcome.incomplete,
        Some(DistributionIncomplete {
            acknowledged: 1,
            required: 2,
        })
    );
    assert_eq!(outcome.aggregate.counts, vec![10, 20]);
    assert_eq!(events.phase_listener().get_latest(), PhaseName::Done);
    assert_eq!(
        events.aggregate_listener().get_latest(),
        AggregateUpdate::New(Arc::new(outcome.aggregate.clone()))
    );
    assert!(site_1.accepted().is_some());
    assert!(site_2.accepted().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_round_aborted_while_distributing() {
    enable_logging();
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::SilentOnAccept { count: 20 }),
    ];
    let (state_machine, abort, events) = init(round_settings(), &test_sites);
    let mut phases = events.phase_listener();
    tokio::spawn(async move {
        while let Some(phase) = phases.changed().await {
            if phase == PhaseName::Distributing {
                abort.abort();
                break;
            }
        }
    });

    let err = state_machine.run().await.unwrap_err();
    assert!(matches!(
        err,
        RoundError::Aborted {
            phase: PhaseName::Distributing
        }
    ));
    assert_eq!(events.phase_listener().get_latest(), PhaseName::Aborted);
    assert_eq!(
        events.aggregate_listener().get_latest(),
        AggregateUpdate::Invalidate
    );
}

#[tokio::test(start_paused = true)]
async fn test_round_grace_period_excludes_late_sites() {
    enable_logging();
    let settings = RoundSettings {
        min_clients: 1,
        ..round_settings()
    };
    let test_sites = [
        TestSite::new("site-1", Behavior::respond(10)),
        TestSite::new("site-2", Behavior::respond_after(500, 20)),
        TestSite::new("site-3", Behavior::respond_after(5000, 30)),
    ];
    let (state_machine, _abort, _events) = init(settings, &test_sites);

    let outcome = state_machine.run().await.unwrap();
    assert_eq!(outcome.contributors, ids(&["site-1", "site-2"]));
    assert_eq!(outcome.aggregate.counts, vec![10, 20]);
    assert!(!outcome.acknowledged.contains(&SiteId::from("site-3")));
}

#[tokio::test]
async fn test_round_over_local_sites() {
    enable_logging();
    let results = TempDir::new().unwrap();
    let sites_settings = SitesSettings {
        data_dir: PathBuf::from("test_data"),
        results_dir: results.path().to_path_buf(),
        names: None,
        seed: Some(7),
    };
    let local_sites = LocalSite::discover(&sites_settings)
        .await
        .unwrap()
        .into_iter()
        .map(|site| Arc::new(site) as Arc<dyn Site>)
        .collect();
    let settings = RoundSettings {
        poll_interval: 10,
        timeout: 60,
        ..round_settings()
    };
    let (state_machine, _abort, _events) =
        RoundInitializer::new(settings, PathBuf::from("configs/parameters.json"), local_sites)
            .init();

    let outcome = state_machine.run().await.unwrap();
    assert_eq!(outcome.contributors, ids(&["site-1", "site-2"]));
    assert_eq!(outcome.acknowledged, ids(&["site-1", "site-2"]));
    assert_eq!(outcome.aggregate.counts, vec![12, 20]);

    let mean_matrix = &outcome.aggregate.mean_matrix;
    assert_eq!(mean_matrix.dim(), 4);
    assert!(mean_matrix.is_finite());
    assert!(mean_matrix.has_unit_diagonal());
    assert!(mean_matrix.is_bounded_by(1.));

    for site in &["site-1", "site-2"] {
        let dir = results.path().join(site);
        let local: SiteContribution =
            serde_json::from_slice(&std::fs::read(dir.join(LOCAL_RESULT_FILE)).unwrap()).unwrap();
        assert_eq!(local.epsilon, 1.);
        assert_eq!(local.low_rank_components, 3);
        let global: GlobalAggregate =
            serde_json::from_slice(&std::fs::read(dir.join(GLOBAL_RESULT_FILE)).unwrap()).unwrap();
        assert_eq!(global, outcome.aggregate);
    }
}
