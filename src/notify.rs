//! Notifications (component K). One Slack incoming-webhook notifier, ported
//! from `post_checks/slack.py::post_run_check_notification`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::telemetry::{CheckResults, LeafChange, PathDiff};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_check(
        &self,
        history: &[CheckResults],
        check_number: usize,
        total_checks: usize,
    ) -> Result<()>;
}

fn transition_emoji(diffs: &[(String, PathDiff)]) -> &'static str {
    for (_, diff) in diffs {
        let PathDiff::Changed { changes } = diff else { continue };
        for change in changes {
            if is_status_leaf(&change.within) {
                if is_up_to_down(change) {
                    return ":warning:";
                }
                if is_down_to_up(change) {
                    return ":up:";
                }
            }
        }
    }
    ":information_source:"
}

fn is_status_leaf(within: &str) -> bool {
    within.ends_with("oper-status") || within.ends_with("session-status") || within.ends_with("session-state")
}

fn is_up_to_down(change: &LeafChange) -> bool {
    value_is(&change.old, "UP") && value_is(&change.new, "DOWN")
}

fn is_down_to_up(change: &LeafChange) -> bool {
    value_is(&change.old, "DOWN") && value_is(&change.new, "UP")
}

fn value_is(value: &Value, expected: &str) -> bool {
    value.as_str().map(|s| s == expected).unwrap_or(false)
}

fn format_diffs(diffs: &[(String, PathDiff)]) -> String {
    diffs
        .iter()
        .map(|(path, diff)| {
            format!(
                "{}\t*Path:* {path} *Diffs:* {}",
                transition_emoji(std::slice::from_ref(&(path.clone(), diff.clone()))),
                serde_json::to_string(diff).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Incoming-webhook Slack notifier for post-change status check results.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), webhook_url: webhook_url.into() }
    }

    fn build_body(history: &[CheckResults], check_number: usize, total_checks: usize) -> Value {
        let mut blocks = Vec::new();
        let results = &history[check_number];
        let check_number = check_number + 1;

        if check_number == 1 {
            blocks.push(json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": ":test_tube: *Ananke CLI post change report*\n"},
            }));
        }
        blocks.push(json!({
            "type": "context",
            "elements": [{"type": "mrkdwn", "text": format!("Check {check_number}/{total_checks}")}],
        }));

        let no_diff_hosts: Vec<&String> =
            results.iter().filter(|(_, diffs)| diffs.is_empty()).map(|(host, _)| host).collect();

        for (hostname, changed_paths) in results {
            if no_diff_hosts.contains(&hostname) {
                continue;
            }
            let unchanged_since_previous = check_number > 1
                && history[check_number - 2].get(hostname) == Some(changed_paths);
            if unchanged_since_previous {
                blocks.push(json!({
                    "type": "context",
                    "elements": [{
                        "type": "mrkdwn",
                        "text": format!(":router:\t_{hostname}_\tNo change since previous check\t:arrow_up:"),
                    }],
                }));
            } else {
                blocks.push(json!({
                    "type": "context",
                    "elements": [{"type": "mrkdwn", "text": format!(":router:\t_{hostname}_")}],
                }));
                blocks.push(json!({
                    "type": "context",
                    "elements": [{"type": "mrkdwn", "text": format_diffs(changed_paths)}],
                }));
            }
        }

        if !no_diff_hosts.is_empty() {
            let hosts: Vec<&str> = no_diff_hosts.iter().map(|s| s.as_str()).collect();
            blocks.push(json!({
                "type": "context",
                "elements": [
                    {"type": "mrkdwn", "text": format!(":white_check_mark:\t_{}_", hosts.join(", "))},
                    {"type": "mrkdwn", "text": "No operational diffs"},
                ],
            }));
        }

        if check_number == total_checks {
            blocks.push(json!({"type": "divider"}));
        }

        json!({"blocks": blocks})
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify_check(
        &self,
        history: &[CheckResults],
        check_number: usize,
        total_checks: usize,
    ) -> Result<()> {
        let body = Self::build_body(history, check_number, total_checks);
        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|err| crate::error::DeployerError::Transport {
                path: self.webhook_url.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn changed(within: &str, old: Value, new: Value) -> (String, PathDiff) {
        ("/p".to_string(), PathDiff::Changed { changes: vec![LeafChange { within: within.to_string(), old, new }] })
    }

    #[test]
    fn warning_emoji_on_oper_status_up_to_down() {
        let diffs = vec![changed("oper-status", json!("UP"), json!("DOWN"))];
        assert_eq!(transition_emoji(&diffs), ":warning:");
    }

    #[test]
    fn up_emoji_on_session_state_down_to_up() {
        let diffs = vec![changed("session-state", json!("DOWN"), json!("UP"))];
        assert_eq!(transition_emoji(&diffs), ":up:");
    }

    #[test]
    fn info_emoji_when_no_status_transition() {
        let diffs = vec![changed("bytes", json!(1000), json!(1050))];
        assert_eq!(transition_emoji(&diffs), ":information_source:");
    }

    #[test]
    fn no_diff_hosts_are_grouped_together() {
        let mut results = BTreeMap::new();
        results.insert("dev1".to_string(), vec![]);
        results.insert("dev2".to_string(), vec![]);
        let body = SlackNotifier::build_body(&[results], 0, 1);
        let text = body.to_string();
        assert!(text.contains("No operational diffs"));
        assert!(text.contains("dev1"));
        assert!(text.contains("dev2"));
    }

    #[test]
    fn unchanged_since_previous_check_is_noted() {
        let mut first = BTreeMap::new();
        first.insert("dev1".to_string(), vec![changed("oper-status", json!("UP"), json!("DOWN"))]);
        let second = first.clone();
        let body = SlackNotifier::build_body(&[first, second], 1, 2);
        assert!(body.to_string().contains("No change since previous check"));
    }
}
