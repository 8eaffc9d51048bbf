use std::time::Duration;

use log::{info, warn};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::core::host::{HostApi, MailReply, ReplyQuery};
use crate::core::tokens::normalize;

pub const DEFAULT_REPLY_POLL: Duration = Duration::from_secs(5 * 60);

const APPROVAL_MARKERS: [&str; 2] = ["aprobad", "approved"];

pub fn is_approval(reply: &MailReply) -> bool {
    let subject = normalize(&reply.subject);
    let body = normalize(&reply.body);
    APPROVAL_MARKERS
        .iter()
        .any(|marker| subject.contains(marker) || body.contains(marker))
}

/// Watches the inbox for an approval reply to a drafted signature request.
pub struct ReplyMonitor<'a> {
    host: &'a dyn HostApi,
    subject: String,
    interval: Duration,
    lookback_minutes: u32,
}

impl<'a> ReplyMonitor<'a> {
    pub fn new(host: &'a dyn HostApi, subject: impl Into<String>) -> Self {
        Self {
            host,
            subject: subject.into(),
            interval: DEFAULT_REPLY_POLL,
            lookback_minutes: 1440,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_lookback(mut self, minutes: u32) -> Self {
        self.lookback_minutes = minutes;
        self
    }

    pub async fn check_once(&self) -> Result<Option<MailReply>, String> {
        let query = ReplyQuery {
            subject_keyword: self.subject.clone(),
            since_minutes: Some(self.lookback_minutes),
        };
        let replies = self.host.check_outlook_replies(&query).await?;
        Ok(replies.into_iter().find(is_approval))
    }

    /// Polls until an approval arrives or `cancel` fires. Failed checks are
    /// logged and retried on the next tick.
    pub async fn run(&self, mut cancel: oneshot::Receiver<()>) -> Option<MailReply> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut cancel => return None,
                _ = ticker.tick() => {}
            }
            match self.check_once().await {
                Ok(Some(reply)) => {
                    info!("Respuesta aprobada para \"{}\"", self.subject);
                    return Some(reply);
                }
                Ok(None) => {}
                Err(error) => warn!("No se pudieron revisar respuestas de Outlook: {error}"),
            }
        }
    }
}
