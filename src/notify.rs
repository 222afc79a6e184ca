use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;

/// Email
///
/// One outbound message. The sink decides how it is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail relay rejected the message with status {0}")]
    Rejected(u16),
    #[error("simulated failure: {0}")]
    Simulated(String),
}

// 1. Notifier Contract
/// Notifier
///
/// The notification sink. Implementations report failures, but callers go
/// through `send_best_effort`, which only logs them: a notification never
/// changes the outcome of the operation that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), NotifyError>;
}

/// NotifierState
///
/// Shared handle to the configured sink.
pub type NotifierState = Arc<dyn Notifier>;

/// send_best_effort
///
/// Fire-and-forget delivery: no retry, failures are logged and swallowed.
pub async fn send_best_effort(notifier: &dyn Notifier, email: Email) {
    let to = email.to.clone();
    let subject = email.subject.clone();
    match notifier.send(email).await {
        Ok(()) => tracing::debug!(%to, %subject, "notification sent"),
        Err(e) => tracing::warn!(%to, %subject, error = %e, "notification failed"),
    }
}

/// Outbox
///
/// Sends notifications on background tasks so a slow or failing sink never
/// delays the response of the operation that triggered them. `flush` waits for
/// everything queued so far (used on shutdown and in tests).
#[derive(Clone)]
pub struct Outbox {
    notifier: NotifierState,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl Outbox {
    pub fn new(notifier: NotifierState) -> Self {
        Self {
            notifier,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Queues `email`. Must be called from within the tokio runtime.
    pub fn send(&self, email: Email) {
        let notifier = self.notifier.clone();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished sends so the set only holds in-flight work.
        while pending.try_join_next().is_some() {}
        pending.spawn(async move { send_best_effort(notifier.as_ref(), email).await });
    }

    pub async fn flush(&self) {
        let mut queued = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        while let Some(result) = queued.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "notification task did not complete");
            }
        }
    }
}

// 2. The Real Implementation (HTTP mail relay)
/// HttpMailRelay
///
/// Posts each email as JSON to a mail relay endpoint (`MAIL_RELAY_URL`).
#[derive(Clone)]
pub struct HttpMailRelay {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailRelay {
    pub fn new(endpoint: &str, from: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpMailRelay {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RelayPayload {
                from: &self.from,
                to: &email.to,
                subject: &email.subject,
                text: &email.body,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// LogNotifier
///
/// Used when no relay is configured. Logs the recipient and subject only;
/// bodies may carry generated passwords.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        tracing::info!(to = %email.to, subject = %email.subject, "mail relay not configured, email dropped");
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)
/// MockNotifier
///
/// Records every email it is asked to send. With `should_fail` set, each send
/// is recorded and then reported as a failure.
#[derive(Clone, Default)]
pub struct MockNotifier {
    pub should_fail: bool,
    sent: Arc<Mutex<Vec<Email>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, address: &str) -> Vec<Email> {
        self.sent().into_iter().filter(|e| e.to == address).collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        if self.should_fail {
            return Err(NotifyError::Simulated(format!("send to {}", email.to)));
        }
        Ok(())
    }
}

// --- Message templates ---

pub fn welcome_email(to: &str, name: &str, role: &str, password: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Your project portal account".to_string(),
        body: format!(
            "Hello {name},\n\nA {role} account has been created for you.\n\
             Sign in with this email address and the one-time password below, \
             then change it from your profile.\n\nPassword: {password}\n"
        ),
    }
}

pub fn project_decision_email(to: &str, project_title: &str, decision: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("Project \"{project_title}\" was {decision}"),
        body: format!("The project \"{project_title}\" you applied to has been {decision}.\n"),
    }
}

pub fn mentor_assigned_email(to: &str, project_title: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("You have been assigned to \"{project_title}\""),
        body: format!("You are now the mentor of the project \"{project_title}\".\n"),
    }
}

pub fn mentor_unassigned_email(to: &str, project_title: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("You have been unassigned from \"{project_title}\""),
        body: format!(
            "The project \"{project_title}\" has been reassigned to another mentor.\n"
        ),
    }
}
