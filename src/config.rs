use std::time::Duration;

use anyhow::Context as _;

use crate::model::ChannelKind;

pub const TITLE_SETTLE_ENV: &str = "CHAPTERSYNC_TITLE_SETTLE_MS";
pub const CONTENT_SETTLE_ENV: &str = "CHAPTERSYNC_CONTENT_SETTLE_MS";
pub const SWITCH_POLICY_ENV: &str = "CHAPTERSYNC_SWITCH_POLICY";

/// What happens to unsaved edits of the previous chapter on a chapter switch.
/// Pending timers are cancelled either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPolicy {
    Flush,
    Discard,
}

impl SwitchPolicy {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "flush" => Ok(Self::Flush),
            "discard" => Ok(Self::Discard),
            other => anyhow::bail!("unsupported switch policy: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub title_settle: Duration,
    pub content_settle: Duration,
    pub switch_policy: SwitchPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title_settle: Duration::from_millis(500),
            content_settle: Duration::from_millis(1000),
            switch_policy: SwitchPolicy::Flush,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(TITLE_SETTLE_ENV) {
            config.title_settle = parse_millis(&raw)
                .with_context(|| format!("invalid {TITLE_SETTLE_ENV}={raw:?}"))?;
        }
        if let Some(raw) = lookup(CONTENT_SETTLE_ENV) {
            config.content_settle = parse_millis(&raw)
                .with_context(|| format!("invalid {CONTENT_SETTLE_ENV}={raw:?}"))?;
        }
        if let Some(raw) = lookup(SWITCH_POLICY_ENV) {
            config.switch_policy = SwitchPolicy::parse(&raw).with_context(|| {
                format!("invalid {SWITCH_POLICY_ENV}={raw:?}. expected one of: flush, discard")
            })?;
        }
        Ok(config)
    }

    pub fn settle_delay(&self, kind: ChannelKind) -> Duration {
        match kind {
            ChannelKind::Title => self.title_settle,
            ChannelKind::Content => self.content_settle,
        }
    }
}

fn parse_millis(raw: &str) -> anyhow::Result<Duration> {
    let millis: u64 = raw.trim().parse().context("expected milliseconds")?;
    Ok(Duration::from_millis(millis))
}
