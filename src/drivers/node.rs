//! Node simulation: register many nodes, heartbeat them, then unregister.
//!
//! Each round heartbeats every node and hands the next batch of nodes an
//! agreement so the agbot searches stop returning them.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{ExchangeConfig, NodeConfig};
use crate::drivers::{Harness, SERVICE_ARCH, SERVICE_URL, SERVICE_VERSION, service_id};
use crate::engine::{CadenceLoop, RoundBody, RoundOutcome, RunLabels, RunSummary};
use crate::error::Result;
use crate::exchange::{ApiCall, ExchangeClient};
use crate::sleeper::Sleeper;

const NODE_TOKEN: &str = "abc123";
const AGBOT_TOKEN: &str = "abc123";

/// Drives a group of simulated edge nodes against one org.
#[derive(Debug, Clone)]
pub struct NodeDriver {
    exchange: ExchangeConfig,
    config: NodeConfig,
    name_base: String,
    /// Services and patterns are shared by every instance on this host when set
    hostname: Option<String>,
}

impl NodeDriver {
    /// `name` is the caller-supplied base; resource ids derive from `<name>-node`.
    pub fn new(exchange: ExchangeConfig, config: NodeConfig, name: &str, hostname: Option<String>) -> Self {
        Self {
            exchange,
            config,
            name_base: format!("{}-node", name),
            hostname: hostname.filter(|h| !h.is_empty()),
        }
    }

    pub fn name_base(&self) -> &str {
        &self.name_base
    }

    fn org(&self) -> &str {
        &self.exchange.org
    }

    pub fn node_id(&self, index: u32) -> String {
        format!("{}-n{}", self.name_base, index)
    }

    fn node_auth(&self, index: u32) -> String {
        format!("{}/{}:{}", self.org(), self.node_id(index), NODE_TOKEN)
    }

    fn agbot_id(&self) -> String {
        format!("{}-a1", self.name_base)
    }

    fn shared_base(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name_base)
    }

    fn service_url(&self, index: u32) -> String {
        format!("{}-svcurl{}", self.shared_base(), index)
    }

    pub fn pattern_id(&self, index: u32) -> String {
        format!("{}-p{}", self.shared_base(), index)
    }

    /// Extra codes tolerated when resources are shared with other instances.
    fn shared_codes(&self, code: u16) -> Vec<u16> {
        if self.hostname.is_some() { vec![code] } else { Vec::new() }
    }

    fn service_body(url: &str) -> serde_json::Value {
        json!({
            "label": "svc",
            "public": true,
            "url": url,
            "version": SERVICE_VERSION,
            "sharable": "singleton",
            "deployment": "{\"services\":{\"svc\":{\"image\":\"openhorizon/gps:1.2.3\"}}}",
            "deploymentSignature": "a",
            "arch": SERVICE_ARCH,
        })
    }

    /// Setup, registration, paced heartbeats, unregistration; returns the run summary.
    ///
    /// Everything after setup falls inside the measured window.
    pub async fn run(&self, harness: &Harness) -> Result<RunSummary> {
        let client = &harness.client;
        log::info!(
            "Initializing node test for {}, with {} heartbeats for {} nodes and {} agreements/HB against {}",
            self.name_base,
            self.config.heartbeats,
            self.config.nodes,
            self.config.agreements_per_round(),
            client.base_url()
        );
        let run_config = self.config.run_config()?;
        self.setup(client).await?;

        let labels = RunLabels::new(self.config.nodes, "nodes", "heartbeats");
        let cadence = CadenceLoop::new(run_config, harness.sleeper.clone()).with_labels(labels);

        // registration and unregistration are the load being measured
        let mut window = cadence.open(harness.counter());
        self.register(client, harness.sleeper.as_ref()).await?;
        let mut round = NodeRound::new(self, client);
        cadence.run_rounds(&mut round, &mut window).await?;
        self.cleanup(client).await?;
        let summary = cadence.close(window, harness.counter());

        harness.reporter().summary(&summary.to_string())?;
        Ok(summary)
    }

    async fn setup(&self, client: &ExchangeClient) -> Result<()> {
        let org = self.org();
        let root = self.exchange.root_auth();
        let user = self.exchange.user_auth();
        let email = &self.exchange.iam_email;

        let (org_body, password, user_get) = match &self.exchange.iam_account_id {
            Some(account) => (
                json!({ "label": "perf test org", "description": "blah blah", "tags": { "ibmcloud_id": account } }),
                "foobar".to_string(),
                format!("orgs/{}/users/iamapikey", org),
            ),
            None => (
                json!({ "label": "perf test org", "description": "blah blah" }),
                self.exchange.iam_key.clone(),
                format!("orgs/{}/users/{}", org, email),
            ),
        };
        client
            .call(ApiCall::post(format!("orgs/{}", org)).auth(&root).accept(&[403]).json_body(&org_body)?)
            .await?;
        let body = json!({ "password": password, "admin": false, "email": email });
        client
            .call(ApiCall::post(format!("orgs/{}/users/{}", org, email)).auth(&root).accept(&[400]).json_body(&body)?)
            .await?;
        client.call(ApiCall::get(user_get).auth(&user)).await?;

        // the primary service is shared by every instance
        client
            .call(
                ApiCall::post(format!("orgs/{}/services", org))
                    .auth(&user)
                    .accept(&[403])
                    .json_body(&Self::service_body(SERVICE_URL))?,
            )
            .await?;

        let shared = self.shared_codes(403);
        for s in 1..=self.config.services {
            client
                .call(
                    ApiCall::post(format!("orgs/{}/services", org))
                        .auth(&user)
                        .accept(&shared)
                        .json_body(&Self::service_body(&self.service_url(s)))?
                        .continue_on_error(true),
                )
                .await?;
        }

        for p in 1..=self.config.patterns {
            let body = json!({
                "label": "pat",
                "public": false,
                "services": [{
                    "serviceUrl": SERVICE_URL,
                    "serviceOrgid": org,
                    "serviceArch": SERVICE_ARCH,
                    "serviceVersions": [{ "version": SERVICE_VERSION }],
                }],
                "userInput": [{
                    "serviceOrgid": org,
                    "serviceUrl": SERVICE_URL,
                    "serviceArch": "",
                    "serviceVersionRange": "[0.0.0,INFINITY)",
                    "inputs": [{ "name": "VERBOSE", "value": true }],
                }],
            });
            client
                .call(
                    ApiCall::post(format!("orgs/{}/patterns/{}", org, self.pattern_id(p)))
                        .auth(&user)
                        .accept(&shared)
                        .json_body(&body)?,
                )
                .await?;
        }

        // an agbot must exist before anything can message the nodes
        let body = json!({ "token": AGBOT_TOKEN, "name": "agbot", "publicKey": "ABC" });
        client
            .call(
                ApiCall::put(format!("orgs/{}/agbots/{}", org, self.agbot_id()))
                    .auth(&user)
                    .accept(&[403])
                    .json_body(&body)?,
            )
            .await?;
        Ok(())
    }

    /// The calls a node makes while registering, for every simulated node.
    async fn register(&self, client: &ExchangeClient, sleeper: &dyn Sleeper) -> Result<()> {
        let org = self.org();
        let user = self.exchange.user_auth();
        let pattern = self.pattern_id(1);
        let create_reg_sleep = Duration::from_millis(self.config.create_reg_sleep_ms);

        for n in 1..=self.config.nodes {
            let node = self.node_id(n);
            let auth = self.node_auth(n);
            if !create_reg_sleep.is_zero() {
                sleeper.sleep(create_reg_sleep).await;
            }

            client.call(ApiCall::get("admin/version").auth(&auth)).await?;
            let body = json!({
                "token": NODE_TOKEN,
                "name": "pi",
                "pattern": format!("{}/{}", org, pattern),
                "arch": SERVICE_ARCH,
                "publicKey": "ABC",
            });
            client
                .call(ApiCall::put(format!("orgs/{}/nodes/{}", org, node)).auth(&user).json_body(&body)?)
                .await?;
            client.call(ApiCall::get(format!("orgs/{}/nodes/{}", org, node)).auth(&auth)).await?;
            client.call(ApiCall::get(format!("orgs/{}", org)).auth(&auth)).await?;
            client
                .call(ApiCall::get(format!("orgs/{}/patterns/{}", org, pattern)).auth(&auth))
                .await?;
            let body = json!({
                "registeredServices": [{
                    "url": format!("{}/{}", org, SERVICE_URL),
                    "numAgreements": 1,
                    "policy": "{blob}",
                    "properties": [
                        { "name": "arch", "value": SERVICE_ARCH, "propType": "string", "op": "in" },
                        { "name": "version", "value": "1.0.0", "propType": "version", "op": "in" },
                    ],
                }],
            });
            client
                .call(
                    ApiCall::patch(format!("orgs/{}/nodes/{}", org, node))
                        .auth(&auth)
                        .json_body(&body)?
                        .continue_on_error(true),
                )
                .await?;
            client
                .call(ApiCall::get(format!("orgs/{}/patterns/{}", org, pattern)).auth(&auth))
                .await?;
            client.call(ApiCall::get(format!("orgs/{}/services", org)).auth(&auth)).await?;
            let body = json!({
                "properties": [{ "name": "purpose", "value": "testing", "type": "string" }],
                "constraints": ["a == b"],
            });
            client
                .call(
                    ApiCall::put(format!("orgs/{}/nodes/{}/policy", org, node))
                        .auth(&auth)
                        .json_body(&body)?
                        .continue_on_error(true),
                )
                .await?;
        }
        Ok(())
    }

    async fn cleanup(&self, client: &ExchangeClient) -> Result<()> {
        let org = self.org();
        let user = self.exchange.user_auth();
        log::info!("Unregistering nodes and cleaning up from node test");

        let status = json!({ "connectivity": { "firmware.bluehorizon.network": true }, "services": [] });
        for n in 1..=self.config.nodes {
            client
                .call(
                    ApiCall::put(format!("orgs/{}/nodes/{}/status", org, self.node_id(n)))
                        .auth(self.node_auth(n))
                        .json_body(&status)?
                        .continue_on_error(true),
                )
                .await?;
        }

        let shared = self.shared_codes(404);
        for p in 1..=self.config.patterns {
            client
                .call(ApiCall::delete(format!("orgs/{}/patterns/{}", org, self.pattern_id(p))).auth(&user).accept(&shared))
                .await?;
        }
        for s in 1..=self.config.services {
            let id = format!("{}_{}_{}", self.service_url(s), SERVICE_VERSION, SERVICE_ARCH);
            client
                .call(ApiCall::delete(format!("orgs/{}/services/{}", org, id)).auth(&user).accept(&shared))
                .await?;
        }
        client
            .call(ApiCall::delete(format!("orgs/{}/services/{}", org, service_id())).auth(&user).accept(&[404]))
            .await?;
        for n in 1..=self.config.nodes {
            client
                .call(ApiCall::delete(format!("orgs/{}/nodes/{}", org, self.node_id(n))).auth(&user))
                .await?;
        }
        client
            .call(ApiCall::delete(format!("orgs/{}/agbots/{}", org, self.agbot_id())).auth(&user))
            .await?;
        Ok(())
    }
}

/// One heartbeat of every simulated node.
struct NodeRound<'a> {
    driver: &'a NodeDriver,
    client: &'a ExchangeClient,
    service_check_elapsed: u64,
    version_check_elapsed: u64,
    next_agreement: u32,
}

impl<'a> NodeRound<'a> {
    fn new(driver: &'a NodeDriver, client: &'a ExchangeClient) -> Self {
        Self {
            driver,
            client,
            service_check_elapsed: 0,
            version_check_elapsed: 0,
            next_agreement: 1,
        }
    }

    async fn heartbeat(&self, index: u32) -> Result<()> {
        let (driver, client) = (self.driver, self.client);
        let org = driver.org();
        let node = driver.node_id(index);
        let auth = driver.node_auth(index);

        client.call(ApiCall::get(format!("orgs/{}/nodes/{}", org, node)).auth(&auth)).await?;
        client
            .call(ApiCall::get(format!("orgs/{}/nodes/{}/msgs", org, node)).auth(&auth).accept(&[404]))
            .await?;
        client
            .call(ApiCall::post(format!("orgs/{}/nodes/{}/heartbeat", org, node)).auth(&auth).continue_on_error(true))
            .await?;
        client
            .call(ApiCall::get(format!("orgs/{}/nodes/{}/policy", org, node)).auth(&auth))
            .await?;

        if self.service_check_elapsed >= driver.config.service_check_interval {
            client
                .call(ApiCall::get(format!("orgs/{}/services", org)).auth(&auth).accept(&[404]))
                .await?;
        }
        if self.version_check_elapsed >= driver.config.version_check_interval {
            client.call(ApiCall::get("admin/version").auth(&auth)).await?;
        }
        Ok(())
    }

    /// Give the next batch of nodes an agreement.
    async fn make_agreements(&mut self) -> Result<()> {
        let (driver, client) = (self.driver, self.client);
        let nodes = driver.config.nodes;
        if self.next_agreement > nodes {
            return Ok(());
        }
        let batch = driver.config.agreements_per_round();
        let last = self.next_agreement.saturating_add(batch.saturating_sub(1)).min(nodes);
        log::info!(
            "Creating agreements for {}-n[{} - {}]",
            driver.name_base,
            self.next_agreement,
            last
        );

        let org = driver.org();
        let body = json!({
            "services": [],
            "agreementService": {
                "orgid": org,
                "pattern": format!("{}/{}", org, driver.pattern_id(1)),
                "url": format!("{}/{}", org, SERVICE_URL),
            },
            "state": "negotiating",
        });
        for n in self.next_agreement..=last {
            let agreement = format!("{}-node-agr{}", driver.name_base, n);
            client
                .call(
                    ApiCall::put(format!("orgs/{}/nodes/{}/agreements/{}", org, driver.node_id(n), agreement))
                        .auth(driver.node_auth(n))
                        .json_body(&body)?
                        .continue_on_error(true),
                )
                .await?;
        }
        self.next_agreement = self.next_agreement.saturating_add(batch);
        Ok(())
    }
}

#[async_trait]
impl RoundBody for NodeRound<'_> {
    async fn run_round(&mut self, round: u32) -> Result<RoundOutcome> {
        let driver = self.driver;
        let config = &driver.config;
        log::info!("Node heartbeat {} of {} for {} nodes", round, config.heartbeats, config.nodes);

        // one heartbeat of all nodes is assumed to take one interval
        self.service_check_elapsed += config.heartbeat_interval;
        self.version_check_elapsed += config.heartbeat_interval;

        for index in 1..=config.nodes {
            self.heartbeat(index).await?;
        }
        self.make_agreements().await?;

        if self.service_check_elapsed >= config.service_check_interval {
            self.service_check_elapsed = 0;
        }
        if self.version_check_elapsed >= config.version_check_interval {
            self.version_check_elapsed = 0;
        }

        // nodes always have work, so node runs never short-circuit
        Ok(RoundOutcome::with_empty(u64::from(config.nodes), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use crate::sleeper::RecordingSleeper;
    use crate::transport::{MockReply, MockTransport, RetryPolicy};
    use reqwest::Method;
    use std::sync::Arc;

    fn exchange() -> ExchangeConfig {
        ExchangeConfig {
            url: "http://ex/v1".to_string(),
            root_password: "rootpw".to_string(),
            iam_key: "key".to_string(),
            iam_email: "me@x.com".to_string(),
            iam_account_id: None,
            org: "perf".to_string(),
        }
    }

    fn config() -> NodeConfig {
        NodeConfig {
            heartbeats: 4,
            nodes: 5,
            services: 2,
            patterns: 1,
            heartbeat_interval: 60,
            service_check_interval: 120,
            version_check_interval: 240,
            ..Default::default()
        }
    }

    fn harness(mock: Arc<MockTransport>) -> (Harness, Arc<MemoryReporter>, Arc<RecordingSleeper>) {
        let reporter = Arc::new(MemoryReporter::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let harness = Harness::new(
            "http://ex/v1",
            mock,
            RetryPolicy::immediate(5),
            sleeper.clone(),
            reporter.clone(),
        );
        (harness, reporter, sleeper)
    }

    #[test]
    fn test_shared_resources_use_hostname() {
        let own = NodeDriver::new(exchange(), config(), "perf1", None);
        assert_eq!(own.pattern_id(1), "perf1-node-p1");
        assert_eq!(own.service_url(2), "perf1-node-svcurl2");

        let shared = NodeDriver::new(exchange(), config(), "perf1", Some("host7".to_string()));
        assert_eq!(shared.pattern_id(1), "host7-p1");
        assert_eq!(shared.service_url(2), "host7-svcurl2");
        assert_eq!(shared.node_id(3), "perf1-node-n3");
    }

    #[tokio::test]
    async fn test_run_heartbeats_every_node() {
        let mock = Arc::new(MockTransport::new());
        let (harness, reporter, sleeper) = harness(mock.clone());
        let driver = NodeDriver::new(exchange(), config(), "perf1", None);

        let summary = driver.run(&harness).await.unwrap();

        assert_eq!(summary.total_rounds, 4);
        assert_eq!(summary.total_processed, 20);
        assert_eq!(summary.min_processed, 5);
        assert_eq!(summary.short_circuited_at, None);
        assert_eq!(sleeper.count(), 4);
        assert_eq!(mock.requests_to(Method::POST, "/heartbeat").len(), 20);
        // service check every 2nd heartbeat, version check on the 4th, plus one version call per registration
        assert_eq!(mock.requests_to(Method::GET, "/orgs/perf/services").len(), 5 + 10);
        assert_eq!(mock.requests_to(Method::GET, "/admin/version").len(), 5 + 5);
        assert_eq!(reporter.summaries().len(), 1);
    }

    #[tokio::test]
    async fn test_operations_include_registration_and_cleanup() {
        let mock = Arc::new(MockTransport::new());
        let (harness, _, _) = harness(mock.clone());
        let config = NodeConfig {
            heartbeats: 1,
            ..config()
        };
        let driver = NodeDriver::new(exchange(), config, "perf1", None);

        let summary = driver.run(&harness).await.unwrap();

        let requests = mock.requests();
        // registration starts with the first node's version check
        let setup = requests.iter().position(|r| r.url.ends_with("/admin/version")).unwrap();
        assert_eq!(summary.operations, (requests.len() - setup) as u64);
        assert_eq!(mock.requests_to(Method::PUT, "/policy").len(), 5);
        // 9 registration calls per node, 4 heartbeat calls per node, 5 agreements
        assert!(summary.operations >= 5 * 9 + 5 * 4 + 5);
        assert_eq!(mock.requests_to(Method::DELETE, "/orgs/perf/agbots/perf1-node-a1").len(), 1);
    }

    #[tokio::test]
    async fn test_agreements_cover_every_node() {
        let mock = Arc::new(MockTransport::new());
        let (harness, _, _) = harness(mock.clone());
        let driver = NodeDriver::new(exchange(), config(), "perf1", None);

        driver.run(&harness).await.unwrap();

        let agreements: Vec<String> = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == Method::PUT && r.url.contains("/agreements/"))
            .map(|r| r.url)
            .collect();
        // 5 nodes over 3 rounds: 2 per round
        assert_eq!(agreements.len(), 5);
        assert!(agreements[4].ends_with("/orgs/perf/nodes/perf1-node-n5/agreements/perf1-node-node-agr5"));
    }

    #[tokio::test]
    async fn test_registration_failure_aborts_run() {
        let mock = Arc::new(MockTransport::new());
        mock.route(Method::PUT, "/orgs/perf/nodes/perf1-node-n2", MockReply::text(400, "bad node"));
        let (harness, _, sleeper) = harness(mock.clone());
        let driver = NodeDriver::new(exchange(), config(), "perf1", None);

        let err = driver.run(&harness).await.unwrap_err();

        assert!(err.to_string().contains("bad HTTP code 400"));
        assert!(mock.requests_to(Method::POST, "/heartbeat").is_empty());
        assert_eq!(sleeper.count(), 0);
    }

    #[tokio::test]
    async fn test_registration_sleep_goes_through_sleeper() {
        let mock = Arc::new(MockTransport::new());
        let (harness, _, sleeper) = harness(mock);
        let config = NodeConfig {
            create_reg_sleep_ms: 250,
            heartbeats: 1,
            ..config()
        };
        let driver = NodeDriver::new(exchange(), config, "perf1", None);

        driver.run(&harness).await.unwrap();

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 5 + 1);
        assert!(sleeps[..5].iter().all(|d| *d == Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_shared_cleanup_tolerates_missing_resources() {
        let mock = Arc::new(MockTransport::new());
        mock.route(Method::DELETE, "/orgs/perf/patterns/host7-p1", MockReply::status(404));
        let (harness, reporter, _) = harness(mock);
        let config = NodeConfig {
            heartbeats: 1,
            nodes: 1,
            ..config()
        };
        let driver = NodeDriver::new(exchange(), config, "perf1", Some("host7".to_string()));

        driver.run(&harness).await.unwrap();

        assert!(reporter.errors().is_empty());
    }
}
