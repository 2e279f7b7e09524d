//! Agbot simulation: agbots that repeatedly look for nodes to make agreements with.
//!
//! Every round each agbot lists the patterns in the org, searches each pattern
//! for candidate nodes and posts a couple of short-lived messages to every
//! node it finds. Rounds in which no agbot finds a pattern count as empty.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::{AgbotConfig, ExchangeConfig};
use crate::drivers::{Harness, SERVICE_ARCH, SERVICE_URL, SERVICE_VERSION, service_id, trim_org};
use crate::engine::{CadenceLoop, RoundBody, RoundOutcome, RunLabels, RunSummary};
use crate::error::Result;
use crate::exchange::{ApiCall, ExchangeClient};

const AGBOT_TOKEN: &str = "abcdef";
const NODE_TOKEN: &str = "abc123";

#[derive(Debug, Default, Deserialize)]
struct ExchangePatterns {
    #[serde(default)]
    patterns: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PatternSearchNode {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct PatternSearch {
    #[serde(default)]
    nodes: Vec<PatternSearchNode>,
}

/// Drives a group of simulated agbots against one org.
#[derive(Debug, Clone)]
pub struct AgbotDriver {
    exchange: ExchangeConfig,
    config: AgbotConfig,
    name_base: String,
}

impl AgbotDriver {
    /// `name` is the caller-supplied base; resource ids derive from `<name>-agbot`.
    pub fn new(exchange: ExchangeConfig, config: AgbotConfig, name: &str) -> Self {
        Self {
            exchange,
            config,
            name_base: format!("{}-agbot", name),
        }
    }

    pub fn name_base(&self) -> &str {
        &self.name_base
    }

    fn org(&self) -> &str {
        &self.exchange.org
    }

    pub fn agbot_id(&self, index: u32) -> String {
        format!("{}-a{}", self.name_base, index)
    }

    fn node_id(&self) -> String {
        format!("{}-n1", self.name_base)
    }

    fn pattern_id(&self) -> String {
        format!("{}-p1", self.name_base)
    }

    /// Setup, paced agreement checks, cleanup; returns the run summary.
    ///
    /// The measured window opens after setup and closes after cleanup.
    pub async fn run(&self, harness: &Harness) -> Result<RunSummary> {
        let client = &harness.client;
        log::info!(
            "Initializing agbot test for {}, with {} agreement checks against {}",
            self.name_base,
            self.config.agreement_checks,
            client.base_url()
        );
        let run_config = self.config.run_config()?;
        self.setup(client).await?;

        let labels = RunLabels::new(self.config.agbots, "agbots", "agreement checks");
        let cadence = CadenceLoop::new(run_config, harness.sleeper.clone()).with_labels(labels);
        let mut round = AgbotRound::new(self, client);

        // cleanup is part of the measured load
        let mut window = cadence.open(harness.counter());
        cadence.run_rounds(&mut round, &mut window).await?;
        let max_patterns = round.max_patterns;
        log::info!("Max patterns processed by one agbot in one check: {}", max_patterns);
        self.cleanup(client).await?;
        let summary = cadence
            .close(window, harness.counter())
            .with_note(format!("Max patterns={}", max_patterns));

        harness.reporter().summary(&summary.to_string())?;
        Ok(summary)
    }

    async fn setup(&self, client: &ExchangeClient) -> Result<()> {
        let org = self.org();
        let root = self.exchange.root_auth();
        let user = self.exchange.user_auth();
        let email = &self.exchange.iam_email;

        // The org and user may already exist when several instances share them.
        match &self.exchange.iam_account_id {
            Some(account) => {
                let body = json!({
                    "label": "perf test org",
                    "description": "blah blah",
                    "tags": { "ibmcloud_id": account },
                });
                client
                    .call(ApiCall::post(format!("orgs/{}", org)).auth(&root).accept(&[403]).json_body(&body)?)
                    .await?;
                let body = json!({ "password": "foobar", "admin": false, "email": email });
                client
                    .call(ApiCall::put(format!("orgs/{}/users/{}", org, email)).auth(&root).accept(&[400]).json_body(&body)?)
                    .await?;
                client.call(ApiCall::get(format!("orgs/{}/users/iamapikey", org)).auth(&user)).await?;
            }
            None => {
                let body = json!({ "label": "perf test org", "description": "blah blah" });
                client
                    .call(ApiCall::post(format!("orgs/{}", org)).auth(&root).accept(&[403]).json_body(&body)?)
                    .await?;
                let body = json!({ "password": self.exchange.iam_key, "admin": false, "email": email });
                client
                    .call(ApiCall::put(format!("orgs/{}/users/{}", org, email)).auth(&root).accept(&[400]).json_body(&body)?)
                    .await?;
                client.call(ApiCall::get(format!("orgs/{}/users/{}", org, email)).auth(&user)).await?;
            }
        }

        for a in 1..=self.config.agbots {
            let agbot = self.agbot_id(a);
            let body = json!({ "token": AGBOT_TOKEN, "name": "agbot", "publicKey": "ABC" });
            client
                .call(ApiCall::put(format!("orgs/{}/agbots/{}", org, agbot)).auth(&user).json_body(&body)?)
                .await?;
            for pattern_org in [org, "IBM"] {
                let body = json!({ "patternOrgid": pattern_org, "pattern": "*", "nodeOrgid": org });
                client
                    .call(ApiCall::post(format!("orgs/{}/agbots/{}/patterns", org, agbot)).auth(&user).json_body(&body)?)
                    .await?;
            }
        }

        let node = self.node_id();
        let node_pattern = if self.config.create_pattern {
            let body = json!({
                "label": "svc",
                "public": true,
                "url": SERVICE_URL,
                "version": SERVICE_VERSION,
                "sharable": "singleton",
                "deployment": "{\"services\":{\"svc\":{\"image\":\"openhorizon/gps:1.2.3\"}}}",
                "deploymentSignature": "a",
                "arch": SERVICE_ARCH,
            });
            client
                .call(ApiCall::post(format!("orgs/{}/services", org)).auth(&user).accept(&[403]).json_body(&body)?)
                .await?;
            let body = json!({
                "label": "pat",
                "public": false,
                "services": [{
                    "serviceUrl": SERVICE_URL,
                    "serviceOrgid": org,
                    "serviceArch": SERVICE_ARCH,
                    "serviceVersions": [{ "version": SERVICE_VERSION }],
                }],
            });
            client
                .call(ApiCall::post(format!("orgs/{}/patterns/{}", org, self.pattern_id())).auth(&user).json_body(&body)?)
                .await?;
            format!("{}/{}", org, self.pattern_id())
        } else {
            String::new()
        };
        let body = json!({
            "token": NODE_TOKEN,
            "name": "pi",
            "pattern": node_pattern,
            "arch": SERVICE_ARCH,
            "publicKey": "ABC",
        });
        client
            .call(ApiCall::put(format!("orgs/{}/nodes/{}", org, node)).auth(&user).json_body(&body)?)
            .await?;

        // Long-lived msgs so every agbot has something to read for the whole run.
        let node_auth = format!("{}/{}:{}", org, node, NODE_TOKEN);
        let msg = json!({ "message": "hey there", "ttl": 8_640_000 });
        for a in 1..=self.config.agbots {
            let agbot = self.agbot_id(a);
            for _ in 0..self.config.msgs {
                client
                    .call(
                        ApiCall::post(format!("orgs/{}/agbots/{}/msgs", org, agbot))
                            .auth(&node_auth)
                            .json_body(&msg)?
                            .continue_on_error(true),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn cleanup(&self, client: &ExchangeClient) -> Result<()> {
        let org = self.org();
        let user = self.exchange.user_auth();
        log::info!("Cleaning up from agbot test");

        for a in 1..=self.config.agbots {
            client
                .call(ApiCall::delete(format!("orgs/{}/agbots/{}", org, self.agbot_id(a))).auth(&user))
                .await?;
        }
        if self.config.create_pattern {
            client
                .call(ApiCall::delete(format!("orgs/{}/patterns/{}", org, self.pattern_id())).auth(&user))
                .await?;
            client
                .call(ApiCall::delete(format!("orgs/{}/services/{}", org, service_id())).auth(&user).accept(&[404]))
                .await?;
        }
        client
            .call(ApiCall::delete(format!("orgs/{}/nodes/{}", org, self.node_id())).auth(&user))
            .await?;
        Ok(())
    }
}

/// One agreement check across every simulated agbot.
struct AgbotRound<'a> {
    driver: &'a AgbotDriver,
    client: &'a ExchangeClient,
    heartbeat_elapsed: u64,
    version_check_elapsed: u64,
    max_patterns: usize,
}

impl<'a> AgbotRound<'a> {
    fn new(driver: &'a AgbotDriver, client: &'a ExchangeClient) -> Self {
        Self {
            driver,
            client,
            heartbeat_elapsed: 0,
            version_check_elapsed: 0,
            max_patterns: 0,
        }
    }

    /// Returns (patterns seen, nodes found) for one agbot.
    async fn check_agreements(&mut self, index: u32) -> Result<(usize, u64)> {
        let (driver, client) = (self.driver, self.client);
        let org = driver.org();
        let agbot = driver.agbot_id(index);
        let auth = format!("{}/{}:{}", org, agbot, AGBOT_TOKEN);
        let root = driver.exchange.root_auth();

        client
            .call(ApiCall::get(format!("orgs/{}/agbots/{}/patterns", org, agbot)).auth(&auth))
            .await?;
        client.call(ApiCall::get(format!("orgs/{}", org)).auth(&auth)).await?;
        client.call(ApiCall::get("orgs/IBM").auth(&root)).await?;

        let mut patterns_seen = 0;
        let mut nodes_found = 0u64;

        let (status, patterns) = client
            .call_as::<ExchangePatterns>(ApiCall::get(format!("orgs/{}/patterns", org)).auth(&auth).accept(&[404]))
            .await?;
        // a 404 still carries a valid (empty) patterns document
        if status == 200 || status == 404 {
            let patterns = patterns.unwrap_or_default();
            patterns_seen = patterns.patterns.len();
            log::info!("Agbot {} processing {} patterns", index, patterns_seen);
            self.max_patterns = self.max_patterns.max(patterns_seen);

            for qualified in patterns.patterns.keys() {
                let pattern = trim_org(qualified)?;
                nodes_found += self.search_pattern(&auth, pattern).await?;
            }
            log::info!("Agbot {} processed {} nodes", index, nodes_found);
        }

        client
            .call(ApiCall::get(format!("orgs/{}/agbots/{}/msgs", org, agbot)).auth(&auth))
            .await?;

        if self.heartbeat_elapsed >= driver.config.heartbeat_interval {
            client
                .call(ApiCall::post(format!("orgs/{}/agbots/{}/heartbeat", org, agbot)).auth(&auth).continue_on_error(true))
                .await?;
            client.call(ApiCall::get(format!("orgs/{}/agbots/{}", org, agbot)).auth(&auth)).await?;
        }
        if self.version_check_elapsed >= driver.config.version_check_interval {
            client.call(ApiCall::get("admin/version").auth(&auth)).await?;
        }

        Ok((patterns_seen, nodes_found))
    }

    async fn search_pattern(&self, auth: &str, pattern: &str) -> Result<u64> {
        let client = self.client;
        let org = self.driver.org();

        // empty lastTime returns every node
        client
            .call(
                ApiCall::post(format!("orgs/{}/patterns/{}/nodehealth", org, pattern))
                    .auth(auth)
                    .accept(&[404])
                    .json_body(&json!({ "lastTime": "" }))?
                    .continue_on_error(true),
            )
            .await?;
        client
            .call(ApiCall::get(format!("orgs/{}/services", org)).auth(auth).accept(&[404]))
            .await?;
        client
            .call(ApiCall::get(format!("orgs/{}/services/{}", org, service_id())).auth(auth).accept(&[404]))
            .await?;

        let body = json!({
            "serviceUrl": format!("{}/{}", org, SERVICE_URL),
            "secondsStale": 0,
            "startIndex": 0,
            "numEntries": 0,
        });
        let (status, found) = client
            .call_as::<PatternSearch>(
                ApiCall::post(format!("orgs/{}/patterns/{}/search", org, pattern))
                    .auth(auth)
                    .accept(&[404, 400])
                    .json_body(&body)?
                    .continue_on_error(true),
            )
            .await?;
        if status != 201 && status != 404 {
            return Ok(0);
        }

        let found = found.unwrap_or_default();
        log::debug!("pattern {} search found {} nodes", pattern, found.nodes.len());
        let msg = json!({ "message": "hey there", "ttl": 5 });
        for node in &found.nodes {
            let node = trim_org(&node.id)?;
            // the node may have been deleted since the search
            client
                .call(ApiCall::get(format!("orgs/{}/nodes/{}", org, node)).auth(auth).accept(&[404]))
                .await?;
            for _ in 0..2 {
                client
                    .call(
                        ApiCall::post(format!("orgs/{}/nodes/{}/msgs", org, node))
                            .auth(auth)
                            .accept(&[404])
                            .json_body(&msg)?
                            .continue_on_error(true),
                    )
                    .await?;
            }
        }
        Ok(found.nodes.len() as u64)
    }
}

#[async_trait]
impl RoundBody for AgbotRound<'_> {
    async fn run_round(&mut self, round: u32) -> Result<RoundOutcome> {
        let driver = self.driver;
        let config = &driver.config;
        log::info!("Agbot agreement check {} of {}", round, config.agreement_checks);

        // one check of all agbots is assumed to take one interval
        self.heartbeat_elapsed += config.new_agreement_interval;
        self.version_check_elapsed += config.new_agreement_interval;

        let mut patterns_seen = 0;
        let mut nodes_found = 0;
        for index in 1..=config.agbots {
            let (patterns, nodes) = self.check_agreements(index).await?;
            patterns_seen += patterns;
            nodes_found += nodes;
        }

        if self.heartbeat_elapsed >= config.heartbeat_interval {
            self.heartbeat_elapsed = 0;
        }
        if self.version_check_elapsed >= config.version_check_interval {
            self.version_check_elapsed = 0;
        }

        Ok(RoundOutcome::with_empty(nodes_found, patterns_seen == 0))
    }
}
