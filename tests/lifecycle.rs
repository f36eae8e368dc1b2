// ABOUTME: Integration tests driving workers through the loops over an in-memory store.
// ABOUTME: Covers initialization, deployment, readiness, retries, timeouts and deletion.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use storage_operator::config::OperatorConfig;
use storage_operator::loops::LoopKind;
use storage_operator::store::{ForceDelete, WaitingMarker};
use storage_operator::types::Hostname;
use support::{Harness, host, volume_payload, worker};

mod initializer {
    use super::*;

    #[tokio::test]
    async fn valid_hostname_becomes_ready_in_one_iteration() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.request("a.example.com").await;

        let obs = h.run(LoopKind::Initializer).await;

        assert_eq!(obs.count("ready"), 1);
        assert!(h.is_ready("w1").await);
        assert!(h.is_initializing("a.example.com").await);
        assert!(h.hostname_error("a.example.com").await.is_none());
    }

    #[tokio::test]
    async fn mixed_case_request_is_normalized_before_lookup() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        let raw = Hostname::new("A.Example.com.");
        h.keys.hostname_initialize().set(&raw, "").await.unwrap();

        let obs = h.run(LoopKind::Initializer).await;

        assert_eq!(obs.count("ready"), 1);
        assert!(h.is_ready("w1").await);
        assert!(h.hostname_error("a.example.com").await.is_none());
        assert!(h.keys.hostname_error().get(&raw).await.unwrap().is_none());
        assert!(!h.keys.hostname_initialize().exists(&raw).await.unwrap());
        assert!(h.api.calls().contains(&"hostname=a.example.com".to_string()));
    }

    #[tokio::test]
    async fn zone_mismatch_is_immediately_terminal() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w9", "US", &["invalidzone.domain"]));
        h.request("invalidzone.domain").await;

        h.run(LoopKind::Initializer).await;

        assert_eq!(
            h.hostname_error("invalidzone.domain").await.as_deref(),
            Some("INVALID_VOLUME_ZONE")
        );
        assert!(!h.is_initializing("invalidzone.domain").await);
        assert!(!h.is_ready("w9").await);
        assert_eq!(
            h.keys
                .hostname_error_attempt()
                .get_int(&host("invalidzone.domain"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn differing_configs_for_one_worker_reject_the_later_hostname() {
        let h = Harness::new("EU");
        let mut a = volume_payload("w1", "EU", &["a.example.com", "b.example.com"]);
        let mut b = a.clone();
        a["features"]["browser"] = true.into();
        b["features"]["browser"] = false.into();
        h.api.by_hostname("a.example.com", a);
        h.api.by_hostname("b.example.com", b);
        h.request("b.example.com").await;
        h.request("a.example.com").await;

        h.run(LoopKind::Initializer).await;

        assert!(h.is_ready("w1").await);
        assert!(h.hostname_error("a.example.com").await.is_none());
        assert_eq!(
            h.hostname_error("b.example.com").await.as_deref(),
            Some("DIFFERENT_VOLUME_CONFIGS")
        );
        let cached = h
            .keys
            .worker_volume_config()
            .get(&worker("w1"))
            .await
            .unwrap()
            .unwrap();
        assert!(cached.contains(r#""browser":true"#));
    }

    #[tokio::test]
    async fn identical_configs_share_one_worker() {
        let h = Harness::new("EU");
        h.api
            .serve(volume_payload("w1", "EU", &["a.example.com", "b.example.com"]));
        h.request("a.example.com").await;
        h.request("b.example.com").await;

        let obs = h.run(LoopKind::Initializer).await;

        assert_eq!(obs.count("ready"), 1);
        assert_eq!(obs.count("in_flight"), 1);
        assert!(h.hostname_error("b.example.com").await.is_none());
    }

    #[tokio::test]
    async fn resolution_exhausts_retry_budget() {
        let mut config = OperatorConfig::for_zone("EU", "http://config.invalid");
        config.initializer.max_error_attempts = 3;
        let h = Harness::with_config(config);
        h.api.fail_hostname("down.example.com", "upstream unavailable");
        h.request("down.example.com").await;

        for _ in 0..2 {
            h.run(LoopKind::Initializer).await;
        }
        assert!(h.is_initializing("down.example.com").await);
        assert!(h.hostname_error("down.example.com").await.is_none());

        h.run(LoopKind::Initializer).await;
        assert_eq!(
            h.hostname_error("down.example.com").await.as_deref(),
            Some("FAILED_TO_GET_VOLUME_CONFIG")
        );
        assert!(!h.is_initializing("down.example.com").await);
    }

    #[tokio::test]
    async fn hard_force_delete_blocks_deployment() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.keys
            .set_force_delete(&worker("w1"), ForceDelete { allow_cancel: false })
            .await
            .unwrap();
        h.request("a.example.com").await;

        let obs = h.run(LoopKind::Initializer).await;

        assert_eq!(obs.count("suppressed"), 1);
        assert!(!h.is_ready("w1").await);
        assert!(h.is_initializing("a.example.com").await);
    }

    #[tokio::test]
    async fn force_update_refetches_and_readies_worker() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.keys.set_force_update(&worker("w1")).await.unwrap();

        let obs = h.run(LoopKind::Initializer).await;

        assert_eq!(obs.count("force_update"), 1);
        assert!(h.is_ready("w1").await);
        assert!(h.is_initializing("a.example.com").await);
        assert!(!h.keys.worker_force_update().exists(&worker("w1")).await.unwrap());
        assert_eq!(h.api.calls(), vec!["worker_id=w1".to_string()]);
    }
}

mod deployer {
    use super::*;

    async fn ready_worker(h: &Harness) {
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.request("a.example.com").await;
        h.run(LoopKind::Initializer).await;
    }

    #[tokio::test]
    async fn deploys_ready_worker_with_merged_values() {
        let mut config = OperatorConfig::for_zone("EU", "http://config.invalid");
        config.deployer.values = serde_json::json!({"replicas": 2, "image": {"tag": "stable"}});
        let h = Harness::with_config(config);
        ready_worker(&h).await;

        let obs = h.run(LoopKind::Deployer).await;

        assert_eq!(obs.count("deployed"), 1);
        assert!(h.is_waiting("w1").await);
        assert!(h.is_ready("w1").await);
        let deployed = h.backend.deployed();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].namespace.as_str(), "worker-w1");
        assert_eq!(deployed[0].values["replicas"], 2);
        assert_eq!(deployed[0].values["features"]["cache"], true);
        assert_eq!(deployed[0].values["image"]["tag"], "stable");
        assert_eq!(deployed[0].values["tls"][0]["hostname"], "a.example.com");
        assert_eq!(deployed[0].values["primaryHostname"], "a.example.com");
    }

    #[tokio::test]
    async fn waiting_worker_is_not_redeployed() {
        let h = Harness::new("EU");
        ready_worker(&h).await;
        h.run(LoopKind::Deployer).await;
        h.run(LoopKind::Deployer).await;

        assert_eq!(h.backend.calls_to("deploy"), 1);
        assert_eq!(h.backend.calls_to("init"), 1);
    }

    #[tokio::test]
    async fn superseded_ready_marker_is_dropped() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.keys
            .set_ready_for_deployment(&worker("w1"), Utc::now())
            .await
            .unwrap();

        let obs = h.run(LoopKind::Deployer).await;

        assert_eq!(obs.count("stale"), 1);
        assert!(!h.is_ready("w1").await);
        assert_eq!(h.backend.calls_to("deploy"), 0);
    }

    #[tokio::test]
    async fn hard_force_delete_stops_pending_deployment() {
        let h = Harness::new("EU");
        ready_worker(&h).await;
        h.keys
            .set_force_delete(&worker("w1"), ForceDelete { allow_cancel: false })
            .await
            .unwrap();

        let obs = h.run(LoopKind::Deployer).await;

        assert_eq!(obs.count("suppressed"), 1);
        assert_eq!(h.backend.calls_to("init"), 0);
        assert_eq!(h.backend.calls_to("deploy"), 0);
        assert!(!h.is_waiting("w1").await);
    }

    #[tokio::test]
    async fn failed_deploy_retries_then_turns_terminal() {
        let h = Harness::new("EU");
        ready_worker(&h).await;
        h.backend.fail_deploys(10);

        h.run(LoopKind::Deployer).await;
        let w1 = worker("w1");
        assert_eq!(
            h.keys.worker_deployment_error_attempt().get_int(&w1).await.unwrap(),
            1
        );
        assert_eq!(
            h.keys.waiting_for_deployment(&w1).await.unwrap(),
            Some(WaitingMarker::RetryAfterError)
        );

        let max = OperatorConfig::for_zone("EU", "x").deployer.max_attempts;
        h.keys
            .worker_deployment_error_attempt()
            .set(&w1, &max.to_string())
            .await
            .unwrap();
        h.keys.worker_waiting_for_deployment().delete(&w1).await.unwrap();

        h.run(LoopKind::Deployer).await;

        assert_eq!(
            h.hostname_error("a.example.com").await.as_deref(),
            Some("FAILED_TO_DEPLOY")
        );
        assert!(!h.is_ready("w1").await);
        assert!(!h.is_waiting("w1").await);
        assert!(!h.is_initializing("a.example.com").await);
    }
}

mod waiter {
    use super::*;

    async fn deployed_worker(h: &Harness) {
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.request("a.example.com").await;
        h.run(LoopKind::Initializer).await;
        h.run(LoopKind::Deployer).await;
    }

    #[tokio::test]
    async fn ready_and_reachable_worker_becomes_available() {
        let h = Harness::new("EU");
        deployed_worker(&h).await;
        h.backend.set_ready("w1", true);

        let obs = h.run(LoopKind::Waiter).await;

        assert_eq!(obs.count("available"), 1);
        assert_eq!(
            h.keys
                .hostname_ingress_hostname()
                .get(&host("a.example.com"))
                .await
                .unwrap()
                .as_deref(),
            Some("gateway.worker-w1.svc:8080")
        );
        assert!(!h.is_waiting("w1").await);
        assert!(!h.is_ready("w1").await);
    }

    #[tokio::test]
    async fn hard_force_delete_blocks_publishing() {
        let h = Harness::new("EU");
        deployed_worker(&h).await;
        h.backend.set_ready("w1", true);
        h.keys
            .set_force_delete(&worker("w1"), ForceDelete { allow_cancel: false })
            .await
            .unwrap();

        let obs = h.run(LoopKind::Waiter).await;

        assert_eq!(obs.count("suppressed"), 1);
        assert_eq!(h.backend.calls_to("is_ready"), 0);
        assert!(
            !h.keys
                .hostname_available()
                .exists(&host("a.example.com"))
                .await
                .unwrap()
        );

        assert_eq!(h.run(LoopKind::Deleter).await.count("deleted"), 1);
        assert!(h.all_keys().await.is_empty());
    }

    #[tokio::test]
    async fn failed_readiness_check_keeps_waiting() {
        let h = Harness::new("EU");
        deployed_worker(&h).await;
        h.backend.set_ready("w1", true);
        h.backend.set_access_ok(false);

        let obs = h.run(LoopKind::Waiter).await;

        assert_eq!(obs.count("waiting"), 1);
        assert!(h.is_waiting("w1").await);
    }

    #[tokio::test]
    async fn expired_wait_sets_timeout_error() {
        let h = Harness::new("EU");
        deployed_worker(&h).await;
        h.keys
            .set_ready_for_deployment(&worker("w1"), Utc::now() - ChronoDuration::hours(2))
            .await
            .unwrap();

        h.run(LoopKind::Waiter).await;

        assert_eq!(
            h.hostname_error("a.example.com").await.as_deref(),
            Some("TIMEOUT_WAITING_FOR_DEPLOYMENT")
        );
        assert!(!h.is_waiting("w1").await);
    }

    #[tokio::test]
    async fn expired_retry_redeploys_through_initializer() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.request("a.example.com").await;
        h.run(LoopKind::Initializer).await;
        h.backend.fail_deploys(1);
        h.run(LoopKind::Deployer).await;
        h.keys
            .set_ready_for_deployment(&worker("w1"), Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();

        assert_eq!(h.run(LoopKind::Waiter).await.count("retry"), 1);
        assert!(h.keys.worker_force_update().exists(&worker("w1")).await.unwrap());

        h.run(LoopKind::Initializer).await;
        assert!(h.is_ready("w1").await);
        h.run(LoopKind::Deployer).await;

        assert_eq!(h.backend.calls_to("deploy"), 2);
        assert_eq!(h.backend.deployed().len(), 1);
        assert!(h.is_waiting("w1").await);
    }

    #[tokio::test]
    async fn waiting_without_ready_is_stale() {
        let h = Harness::new("EU");
        h.keys
            .set_waiting_for_deployment(&worker("w1"), WaitingMarker::Deploying)
            .await
            .unwrap();

        assert_eq!(h.run(LoopKind::Waiter).await.count("stale"), 1);
        assert!(!h.is_waiting("w1").await);
        assert_eq!(h.backend.calls_to("is_ready"), 0);
    }
}

mod deleter {
    use super::*;

    #[tokio::test]
    async fn cancelable_delete_skipped_while_initializing() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.keys
            .set_force_delete(&worker("w1"), ForceDelete { allow_cancel: true })
            .await
            .unwrap();
        h.request("a.example.com").await;

        let obs = h.run(LoopKind::Deleter).await;

        assert_eq!(obs.count("cancelled"), 1);
        assert_eq!(h.backend.calls_to("delete"), 0);
        assert!(h.keys.force_delete(&worker("w1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn forced_delete_clears_keys_and_deletes_workload() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.request("a.example.com").await;
        h.run(LoopKind::Initializer).await;
        h.keys
            .set_force_delete(&worker("w1"), ForceDelete { allow_cancel: false })
            .await
            .unwrap();

        assert_eq!(h.run(LoopKind::Deleter).await.count("deleted"), 1);

        assert!(h.all_keys().await.is_empty());
        assert_eq!(
            h.backend.calls().last().map(String::as_str),
            Some("delete worker-w1 namespace=true release=true")
        );
    }

    #[tokio::test]
    async fn unresolvable_config_postpones_deletion() {
        let h = Harness::new("EU");
        let w1 = worker("w1");
        let a = host("a.example.com");
        h.keys
            .set_worker_available(&w1, &[a.clone()], "gateway.worker-w1.svc:8080")
            .await
            .unwrap();
        h.keys
            .set_force_delete(&w1, ForceDelete { allow_cancel: false })
            .await
            .unwrap();

        // API down: the failure is cached and nothing is cleared.
        let obs = h.run(LoopKind::Deleter).await;
        assert_eq!(obs.count("config_unavailable"), 1);
        assert_eq!(h.backend.calls_to("delete"), 0);
        assert!(h.keys.force_delete(&w1).await.unwrap().is_some());
        assert!(h.keys.hostname_available().exists(&a).await.unwrap());
        assert!(h.keys.worker_volume_config().exists(&w1).await.unwrap());

        // Cached failure is refetched once the API answers again.
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        assert_eq!(h.run(LoopKind::Deleter).await.count("deleted"), 1);
        assert!(h.all_keys().await.is_empty());
    }

    #[tokio::test]
    async fn failed_backend_delete_is_retried() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.keys
            .set_force_delete(&worker("w1"), ForceDelete { allow_cancel: false })
            .await
            .unwrap();
        h.backend.fail_deletes(true);

        let obs = h.run(LoopKind::Deleter).await;
        assert_eq!(obs.count("failed"), 1);
        assert!(h.keys.force_delete(&worker("w1")).await.unwrap().is_some());

        h.backend.fail_deletes(false);
        assert_eq!(h.run(LoopKind::Deleter).await.count("deleted"), 1);
        assert!(h.keys.force_delete(&worker("w1")).await.unwrap().is_none());
    }
}

mod updater {
    use super::*;

    #[tokio::test]
    async fn stuck_pending_release_is_force_updated() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.backend
            .add_release("w1", "pending-install", Utc::now() - ChronoDuration::hours(1), 1);
        h.backend.add_foreign_release("kube-system");

        let obs = h.run(LoopKind::Updater).await;

        assert_eq!(obs.count("force_update"), 1);
        assert_eq!(obs.count("unmanaged"), 1);
        assert!(h.keys.worker_force_update().exists(&worker("w1")).await.unwrap());
    }

    #[tokio::test]
    async fn idle_release_is_force_deleted_with_cancel() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.backend
            .add_release("w1", "deployed", Utc::now() - ChronoDuration::days(3), 4);

        h.run(LoopKind::Updater).await;

        assert_eq!(
            h.keys.force_delete(&worker("w1")).await.unwrap(),
            Some(ForceDelete { allow_cancel: true })
        );
    }

    #[tokio::test]
    async fn recent_activity_keeps_release() {
        let h = Harness::new("EU");
        h.api.serve(volume_payload("w1", "EU", &["a.example.com"]));
        h.backend
            .add_release("w1", "deployed", Utc::now() - ChronoDuration::days(3), 4);
        h.keys
            .set_last_action(
                &storage_operator::types::Namespace::for_worker(&worker("w1")),
                Utc::now() - ChronoDuration::minutes(10),
            )
            .await
            .unwrap();

        assert_eq!(h.run(LoopKind::Updater).await.count("current"), 1);
        assert!(h.keys.force_delete(&worker("w1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tenant_override_suppresses_delete() {
        let h = Harness::new("EU");
        let mut payload = volume_payload("w1", "EU", &["a.example.com"]);
        payload["disable_force_delete"] = true.into();
        h.api.serve(payload);
        h.backend
            .add_release("w1", "deployed", Utc::now() - ChronoDuration::days(3), 4);

        assert_eq!(h.run(LoopKind::Updater).await.count("suppressed"), 1);
        assert!(h.keys.force_delete(&worker("w1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn busy_worker_is_left_alone() {
        let h = Harness::new("EU");
        h.backend
            .add_release("w1", "pending-install", Utc::now() - ChronoDuration::hours(1), 1);
        h.keys
            .set_ready_for_deployment(&worker("w1"), Utc::now())
            .await
            .unwrap();

        assert_eq!(h.run(LoopKind::Updater).await.count("busy"), 1);
        assert!(!h.keys.worker_force_update().exists(&worker("w1")).await.unwrap());
    }
}

#[tokio::test]
async fn example007_end_to_end() {
    let h = Harness::new("EU");
    h.api.serve(volume_payload("w7", "EU", &["example007.com"]));
    h.request("example007.com").await;

    h.run(LoopKind::Initializer).await;
    assert!(h.is_ready("w7").await);

    h.run(LoopKind::Deployer).await;
    assert!(h.is_waiting("w7").await);
    assert_eq!(h.backend.calls_to("deploy"), 1);

    h.backend.set_ready("w7", true);
    h.run(LoopKind::Waiter).await;

    assert!(
        h.keys
            .hostname_available()
            .exists(&host("example007.com"))
            .await
            .unwrap()
    );
    assert_eq!(h.backend.calls_to("verify_access"), 1);
    assert!(h.hostname_error("example007.com").await.is_none());
    assert!(!h.is_initializing("example007.com").await);
    assert!(
        h.all_keys()
            .await
            .iter()
            .all(|k| !k.contains("error") && !k.contains("opstatus")),
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn failed_resolutions_below_budget_stay_pending(failures in 1i64..6) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let mut config = OperatorConfig::for_zone("EU", "http://config.invalid");
            config.initializer.max_error_attempts = 6;
            let h = Harness::with_config(config);
            h.api.fail_hostname("flaky.example.com", "timeout");
            h.request("flaky.example.com").await;

            for _ in 0..failures {
                h.run(LoopKind::Initializer).await;
            }

            let attempts = h
                .keys
                .hostname_error_attempt()
                .get_int(&host("flaky.example.com"))
                .await
                .unwrap();
            assert_eq!(attempts, failures);
            assert!(h.is_initializing("flaky.example.com").await);
            assert!(h.hostname_error("flaky.example.com").await.is_none());
        });
    }
}
