//! Fixture builders with sensible defaults.

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use router_domain::entities::{AnalysisConfig, NodeInfo, NodeRecord, Recording};
use router_domain::rule::{Condition, RoutingRule, RuleAction};

/// Builds routing rules; defaults to one enabled action and
/// `router_ids = [rule_id]`.
pub struct RuleBuilder {
    rule: RoutingRule,
}

impl RuleBuilder {
    pub fn new(rule_id: &str) -> Self {
        let now = Utc::now();
        Self {
            rule: RoutingRule {
                rule_id: rule_id.to_string(),
                rule_name: format!("rule {rule_id}"),
                description: String::new(),
                conditions: Default::default(),
                actions: vec![RuleAction {
                    analysis_method_id: "fft".to_string(),
                    config_id: "cfg-fft".to_string(),
                    target_instance: "primary".to_string(),
                }],
                router_ids: vec![rule_id.to_string()],
                priority: 0,
                enabled: true,
                backfill_enabled: true,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Adds a condition from its JSON wire form.
    pub fn condition(mut self, path: &str, raw: Value) -> Self {
        let condition: Condition =
            serde_json::from_value(raw).expect("condition wire form must deserialize");
        self.rule.conditions.insert(path.to_string(), condition);
        self
    }

    /// Replaces the default action list.
    pub fn actions(mut self, actions: Vec<(&str, &str)>) -> Self {
        self.rule.actions = actions
            .into_iter()
            .map(|(method, config)| RuleAction {
                analysis_method_id: method.to_string(),
                config_id: config.to_string(),
                target_instance: "primary".to_string(),
            })
            .collect();
        self
    }

    pub fn router_ids(mut self, router_ids: Vec<&str>) -> Self {
        self.rule.router_ids = router_ids.into_iter().map(str::to_string).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.rule.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    pub fn backfill_enabled(mut self, enabled: bool) -> Self {
        self.rule.backfill_enabled = enabled;
        self
    }

    pub fn build(mut self) -> RoutingRule {
        self.rule.normalize();
        self.rule
    }
}

/// Builds recordings; the attribute bag starts empty.
pub struct RecordingBuilder {
    recording: Recording,
}

impl RecordingBuilder {
    pub fn new(analyze_uuid: &str) -> Self {
        Self {
            recording: Recording {
                analyze_uuid: analyze_uuid.to_string(),
                info_features: json!({}),
                assigned_router_ids: vec![],
                last_router_dispatch: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn feature(mut self, key: &str, value: Value) -> Self {
        if let Some(bag) = self.recording.info_features.as_object_mut() {
            bag.insert(key.to_string(), value);
        }
        self
    }

    pub fn features(mut self, bag: Value) -> Self {
        self.recording.info_features = bag;
        self
    }

    pub fn assigned_to(mut self, router_id: &str) -> Self {
        self.recording.assigned_router_ids.push(router_id.to_string());
        self
    }

    pub fn created_seconds_ago(mut self, seconds: i64) -> Self {
        self.recording.created_at = Utc::now() - Duration::seconds(seconds);
        self
    }

    pub fn build(self) -> Recording {
        self.recording
    }
}

/// Analysis config fixture.
pub fn analysis_config(config_id: &str, analysis_method_id: &str, enabled: bool) -> AnalysisConfig {
    let now = Utc::now();
    AnalysisConfig {
        config_id: config_id.to_string(),
        analysis_method_id: analysis_method_id.to_string(),
        config_name: format!("config {config_id}"),
        parameters: json!({}),
        enabled,
        created_at: now,
        updated_at: now,
    }
}

/// Builds node records, typically with a backdated heartbeat.
pub struct NodeRecordBuilder {
    record: NodeRecord,
}

impl NodeRecordBuilder {
    pub fn new(node_id: &str) -> Self {
        let now = Utc::now();
        Self {
            record: NodeRecord {
                node_id: node_id.to_string(),
                info: NodeInfo {
                    hostname: format!("host-{node_id}"),
                    version: "0.1.0".to_string(),
                    capabilities: vec!["generic".to_string()],
                    max_concurrent_tasks: 5,
                    tags: vec![],
                },
                current_tasks: 0,
                last_heartbeat: now,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn heartbeat_seconds_ago(mut self, seconds: i64) -> Self {
        self.record.last_heartbeat = Utc::now() - Duration::seconds(seconds);
        self
    }

    pub fn current_tasks(mut self, count: i32) -> Self {
        self.record.current_tasks = count;
        self
    }

    pub fn build(self) -> NodeRecord {
        self.record
    }
}
