// ── Notifier ──
//
// Picks the most specific notification profile for a state change, merges
// it over the `common` profile and composes the outbound payload.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{NotifyConfig, NotifyProfile};
use crate::error::HostError;
use crate::host::{NotifyPayload, NotifyService};
use crate::model::{AlarmState, ChangeSource};

/// Profile that supplies defaults and is never selected on its own.
pub const COMMON_PROFILE: &str = "common";

const SEND_MESSAGE_ACTION: &str = "notify.send_message";

/// What to notify about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequest {
    pub source: ChangeSource,
    pub from: Option<AlarmState>,
    pub to: Option<AlarmState>,
    pub title: Option<String>,
    pub message: Option<String>,
}

impl NotifyRequest {
    pub fn transition(source: ChangeSource, from: AlarmState, to: AlarmState) -> Self {
        Self {
            source,
            from: Some(from),
            to: Some(to),
            title: None,
            message: None,
        }
    }

    pub fn message(
        source: ChangeSource,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            from: None,
            to: None,
            title: Some(title.into()),
            message: Some(message.into()),
        }
    }
}

/// A fully composed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Composed {
    pub profile: String,
    pub action: String,
    pub payload: NotifyPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    Sent(Composed),
    Skipped(&'static str),
}

pub struct Notifier {
    config: NotifyConfig,
    service: Arc<dyn NotifyService>,
}

impl Notifier {
    pub fn new(config: NotifyConfig, service: Arc<dyn NotifyService>) -> Self {
        Self { config, service }
    }

    /// Most specific profile whose filters accept this change: profiles
    /// listing fewer states go first, profiles without a state filter last.
    pub fn select_profile(
        &self,
        source: ChangeSource,
        from: Option<AlarmState>,
        to: Option<AlarmState>,
    ) -> Option<&str> {
        let mut candidates: Vec<(&String, &NotifyProfile)> = self
            .config
            .profiles
            .iter()
            .filter(|(name, _)| name.as_str() != COMMON_PROFILE)
            .collect();
        candidates.sort_by_key(|(_, p)| {
            if p.state.is_empty() {
                usize::MAX
            } else {
                p.state.len()
            }
        });

        candidates
            .into_iter()
            .find(|(_, p)| {
                let source_ok = p.source.is_empty() || p.source.contains(&source);
                let state_ok = p.state.is_empty()
                    || from.is_some_and(|s| p.state.contains(&s))
                    || to.is_some_and(|s| p.state.contains(&s));
                source_ok && state_ok
            })
            .map(|(name, _)| name.as_str())
    }

    /// Build the notification, or explain why none should be sent.
    pub fn compose(&self, request: &NotifyRequest) -> Result<Composed, &'static str> {
        let name = self
            .select_profile(request.source, request.from, request.to)
            .ok_or("no matching profile")?;
        let profile = self.merged_profile(name);

        let action = profile
            .service
            .clone()
            .or_else(|| self.config.action.clone())
            .ok_or("no notify action")?;
        let target = if profile.targets.is_empty() {
            self.config.targets.clone()
        } else {
            profile.targets.clone()
        };
        if action == SEND_MESSAGE_ACTION && target.is_empty() {
            return Err("send_message without targets");
        }

        let mut data = profile.data;
        fill_placeholder(&mut data, "source", request.source.as_ref());
        fill_placeholder(&mut data, "profile", name);
        if profile.supernotify && !profile.scenario.is_empty() {
            data.insert(
                "apply_scenarios".into(),
                Value::Array(profile.scenario.iter().cloned().map(Value::String).collect()),
            );
        }

        Ok(Composed {
            profile: name.to_owned(),
            action,
            payload: NotifyPayload {
                message: request
                    .message
                    .clone()
                    .unwrap_or_else(|| default_message(request)),
                title: Some(request.title.clone().unwrap_or_else(|| default_title(request))),
                data,
                target,
            },
        })
    }

    /// Compose and send. Skips are not errors.
    pub async fn notify(&self, request: &NotifyRequest) -> Result<NotifyOutcome, HostError> {
        let composed = match self.compose(request) {
            Ok(c) => c,
            Err(reason) => {
                debug!(source = %request.source, reason, "notification skipped");
                return Ok(NotifyOutcome::Skipped(reason));
            }
        };
        self.service
            .send(&composed.action, composed.payload.clone())
            .await?;
        info!(
            action = %composed.action,
            profile = %composed.profile,
            source = %request.source,
            "notification sent"
        );
        Ok(NotifyOutcome::Sent(composed))
    }

    fn merged_profile(&self, name: &str) -> NotifyProfile {
        let common = self
            .config
            .profiles
            .get(COMMON_PROFILE)
            .cloned()
            .unwrap_or_default();
        let Some(selected) = self.config.profiles.get(name) else {
            return common;
        };
        let mut data = common.data;
        data.extend(selected.data.clone());
        NotifyProfile {
            service: selected.service.clone().or(common.service),
            targets: if selected.targets.is_empty() {
                common.targets
            } else {
                selected.targets.clone()
            },
            source: selected.source.clone(),
            state: selected.state.clone(),
            supernotify: selected.supernotify || common.supernotify,
            scenario: if selected.scenario.is_empty() {
                common.scenario
            } else {
                selected.scenario.clone()
            },
            data,
        }
    }
}

fn fill_placeholder(data: &mut Map<String, Value>, key: &str, value: &str) {
    if data.get(key).is_some_and(Value::is_null) {
        data.insert(key.to_owned(), Value::String(value.to_owned()));
    }
}

fn default_title(request: &NotifyRequest) -> String {
    match request.to {
        Some(to) => format!("Alarm now {to}"),
        None => "Alarm Panel Change".to_owned(),
    }
}

fn default_message(request: &NotifyRequest) -> String {
    match (request.from, request.to) {
        (Some(from), Some(to)) => format!(
            "Alarm state changed from {from} to {to} by {}",
            request.source.capitalized()
        ),
        _ => "Alarm control panel operation complete".to_owned(),
    }
}
