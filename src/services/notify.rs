//! Outbound transactional email.
//!
//! Every email the system sends funnels through [`NotificationDispatcher`]:
//! template lookup, `SUBJECT:` extraction, `{{key}}` substitution, recipient
//! cleanup, and bounded retry on transient transport failure.

use std::collections::HashMap;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;

use crate::config::SmtpConfig;
use crate::utils::error::AppError;

const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Built-in templates. The first line of each carries the default subject.
const TEMPLATES: &[(&str, &str)] = &[
    (
        "invite",
        "SUBJECT: You have been invited to {{club_name}}\n\
         Hi,\n\nYou have been invited to join {{club_name}} as {{title}}.\n\
         Use invite {{invite_id}} to accept.\n",
    ),
    (
        "owner_welcome",
        "SUBJECT: Welcome to {{club_name}} leadership\n\
         Hi,\n\nYou have been invited to help run {{club_name}} as {{title}}.\n\
         Use invite {{invite_id}} to accept.\n",
    ),
    (
        "approval_decision",
        "SUBJECT: Your club {{club_name}} has been {{decision}}\n\
         Hi,\n\nYour club {{club_name}} has been {{decision}}.\n\n{{comment}}\n",
    ),
    (
        "renewal_confirmation",
        "SUBJECT: {{club_name}} has been renewed\n\
         Hi,\n\n{{club_name}} is marked active for this school year.\n",
    ),
    (
        "ownership_request",
        "SUBJECT: Ownership request for {{club_name}}\n\
         Hi,\n\n{{requester}} has requested ownership of {{club_name}}.\n",
    ),
    (
        "ticket_confirmation",
        "SUBJECT: Your ticket for {{event_name}}\n\
         Hi,\n\nYour ticket for {{event_name}} ({{class_name}}) is confirmed.\n\
         Ticket id: {{ticket_id}}\n",
    ),
    (
        "ticket_transfer",
        "SUBJECT: Ticket transferred for {{event_name}}\n\
         Hi,\n\nTicket {{ticket_id}} for {{event_name}} was transferred from \
         {{sender}} to {{receiver}}.\n",
    ),
    (
        "deadline_reminder",
        "SUBJECT: {{club_name}} applications close in three days\n\
         Hi,\n\nApplications for {{club_name}} close on {{deadline}}.\n",
    ),
    (
        "approval_queue_reminder",
        "SUBJECT: {{pending_count}} clubs awaiting review\n\
         Hi,\n\nThere are {{pending_count}} clubs in the approval queue.\n",
    ),
    (
        "deactivation_notice",
        "SUBJECT: Renew {{club_name}} for the new school year\n\
         Hi,\n\n{{club_name}} has been deactivated for the yearly renewal \
         cycle. An owner must renew it to stay listed.\n",
    ),
];

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub recipients: Vec<String>,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct MailerError {
    pub message: String,
    /// Disconnects and auth errors are worth retrying; permanent rejections
    /// are not.
    pub transient: bool,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), MailerError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| AppError::Internal(format!("smtp relay setup failed: {e}")))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        let from = config
            .from_address
            .parse()
            .map_err(|e| AppError::Internal(format!("invalid SMTP_FROM address: {e}")))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), MailerError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&email.subject);
        for recipient in &email.recipients {
            let mailbox: Mailbox = recipient.parse().map_err(|e| MailerError {
                message: format!("invalid recipient {recipient}: {e}"),
                transient: false,
            })?;
            builder = builder.to(mailbox);
        }

        let mut multipart = MultiPart::alternative()
            .singlepart(SinglePart::plain(email.text_body.clone()))
            .singlepart(SinglePart::html(email.html_body.clone()));
        for attachment in &email.attachments {
            let content_type =
                ContentType::parse(&attachment.content_type).map_err(|e| MailerError {
                    message: format!("bad attachment content type: {e}"),
                    transient: false,
                })?;
            multipart = multipart.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.body.clone(), content_type),
            );
        }

        let message = builder.multipart(multipart).map_err(|e| MailerError {
            message: format!("failed to assemble message: {e}"),
            transient: false,
        })?;

        self.transport.send(message).await.map_err(|e| {
            // 5xx rejections are permanent; disconnects and 4xx are worth
            // another attempt
            let transient = !e.is_permanent();
            MailerError {
                message: e.to_string(),
                transient,
            }
        })?;
        Ok(())
    }
}

pub struct NotificationDispatcher<M: Mailer> {
    mailer: M,
    templates: HashMap<&'static str, &'static str>,
}

impl<M: Mailer> NotificationDispatcher<M> {
    pub fn new(mailer: M) -> Self {
        Self {
            mailer,
            templates: TEMPLATES.iter().copied().collect(),
        }
    }

    /// Render and send a named template. Returns `Ok(false)` when no valid
    /// recipients remain after cleanup; `Err` when retries are exhausted.
    pub async fn send<C: Serialize>(
        &self,
        template_name: &str,
        subject_override: Option<&str>,
        recipients: &[String],
        context: &C,
        attachments: Vec<EmailAttachment>,
    ) -> Result<bool, AppError> {
        let template = self.templates.get(template_name).ok_or_else(|| {
            AppError::Internal(format!("unknown email template '{template_name}'"))
        })?;

        let rendered = render_template(template, context)?;
        let subject = subject_override
            .map(str::to_string)
            .or(rendered.subject)
            .ok_or_else(|| {
                AppError::Internal(format!("template '{template_name}' has no subject"))
            })?;

        self.dispatch(subject, rendered.body, recipients, attachments)
            .await
    }

    /// Send a caller-supplied body (application decision emails carry their
    /// own text).
    pub async fn send_custom(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<bool, AppError> {
        self.dispatch(subject.to_string(), body.to_string(), recipients, Vec::new())
            .await
    }

    async fn dispatch(
        &self,
        subject: String,
        body: String,
        recipients: &[String],
        attachments: Vec<EmailAttachment>,
    ) -> Result<bool, AppError> {
        let recipients = clean_recipients(recipients);
        if recipients.is_empty() {
            tracing::debug!(subject = %subject, "Skipping email with no recipients");
            return Ok(false);
        }

        let email = OutboundEmail {
            subject,
            html_body: text_to_html(&body),
            text_body: body,
            recipients,
            attachments,
        };

        let mut last_error = None;
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            match self.mailer.deliver(&email).await {
                Ok(()) => {
                    tracing::info!(
                        subject = %email.subject,
                        recipients = email.recipients.len(),
                        "Email sent"
                    );
                    return Ok(true);
                }
                Err(e) if e.transient && attempt < MAX_DELIVERY_ATTEMPTS => {
                    tracing::warn!(
                        attempt,
                        error = %e.message,
                        "Transient email failure, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(AppError::EmailTransport(e.message));
                }
            }
        }

        Err(AppError::EmailTransport(
            last_error
                .map(|e| e.message)
                .unwrap_or_else(|| "delivery retries exhausted".to_string()),
        ))
    }
}

struct RenderedTemplate {
    subject: Option<String>,
    body: String,
}

/// Substitute `{{key}}` placeholders from the serialized context and split
/// off a leading `SUBJECT:` line.
fn render_template<C: Serialize>(template: &str, context: &C) -> Result<RenderedTemplate, AppError> {
    let value = serde_json::to_value(context)
        .map_err(|e| AppError::Internal(format!("unserializable email context: {e}")))?;

    let mut rendered = template.to_string();
    if let serde_json::Value::Object(map) = value {
        for (key, val) in map {
            let replacement = match val {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), &replacement);
        }
    }

    if let Some(rest) = rendered.strip_prefix("SUBJECT:") {
        let (subject, body) = rest.split_once('\n').unwrap_or((rest, ""));
        Ok(RenderedTemplate {
            subject: Some(subject.trim().to_string()),
            body: body.to_string(),
        })
    } else {
        Ok(RenderedTemplate {
            subject: None,
            body: rendered,
        })
    }
}

/// Deduplicate (case-insensitive) and drop blank entries, preserving order.
fn clean_recipients(recipients: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .filter(|r| seen.insert(r.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn text_to_html(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<html><body><p>{}</p></body></html>", escaped.replace('\n', "<br>"))
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every delivery; fails transiently for the first
    /// `transient_failures` attempts.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutboundEmail>>,
        pub transient_failures: Mutex<u32>,
        pub permanent_failure: Mutex<bool>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn deliver(&self, email: &OutboundEmail) -> Result<(), MailerError> {
            if *self.permanent_failure.lock().unwrap() {
                return Err(MailerError {
                    message: "mailbox rejected".into(),
                    transient: false,
                });
            }
            let mut failures = self.transient_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MailerError {
                    message: "connection reset".into(),
                    transient: true,
                });
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingMailer;
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct InviteContext {
        club_name: String,
        title: String,
        invite_id: String,
    }

    fn context() -> InviteContext {
        InviteContext {
            club_name: "Chess Club".into(),
            title: "Member".into(),
            invite_id: "abcd1234".into(),
        }
    }

    #[tokio::test]
    async fn renders_subject_from_template_annotation() {
        let dispatcher = NotificationDispatcher::new(RecordingMailer::default());
        let sent = dispatcher
            .send(
                "invite",
                None,
                &["a@example.edu".into()],
                &context(),
                Vec::new(),
            )
            .await
            .unwrap();
        assert!(sent);

        let emails = dispatcher.mailer.sent.lock().unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].subject, "You have been invited to Chess Club");
        assert!(emails[0].text_body.contains("abcd1234"));
        assert!(emails[0].html_body.contains("<br>"));
    }

    #[tokio::test]
    async fn subject_override_wins() {
        let dispatcher = NotificationDispatcher::new(RecordingMailer::default());
        dispatcher
            .send(
                "invite",
                Some("Custom subject"),
                &["a@example.edu".into()],
                &context(),
                Vec::new(),
            )
            .await
            .unwrap();
        let emails = dispatcher.mailer.sent.lock().unwrap();
        assert_eq!(emails[0].subject, "Custom subject");
    }

    #[tokio::test]
    async fn no_recipients_returns_false() {
        let dispatcher = NotificationDispatcher::new(RecordingMailer::default());
        let sent = dispatcher
            .send(
                "invite",
                None,
                &["".into(), "   ".into()],
                &context(),
                Vec::new(),
            )
            .await
            .unwrap();
        assert!(!sent);
        assert!(dispatcher.mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recipients_are_deduplicated() {
        let dispatcher = NotificationDispatcher::new(RecordingMailer::default());
        dispatcher
            .send(
                "invite",
                None,
                &[
                    "a@example.edu".into(),
                    "A@Example.edu".into(),
                    "b@example.edu".into(),
                ],
                &context(),
                Vec::new(),
            )
            .await
            .unwrap();
        let emails = dispatcher.mailer.sent.lock().unwrap();
        assert_eq!(emails[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let mailer = RecordingMailer::default();
        *mailer.transient_failures.lock().unwrap() = 2;
        let dispatcher = NotificationDispatcher::new(mailer);
        let sent = dispatcher
            .send(
                "invite",
                None,
                &["a@example.edu".into()],
                &context(),
                Vec::new(),
            )
            .await
            .unwrap();
        assert!(sent);
        assert_eq!(dispatcher.mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_an_error() {
        let mailer = RecordingMailer::default();
        *mailer.transient_failures.lock().unwrap() = 10;
        let dispatcher = NotificationDispatcher::new(mailer);
        let result = dispatcher
            .send(
                "invite",
                None,
                &["a@example.edu".into()],
                &context(),
                Vec::new(),
            )
            .await;
        assert!(matches!(result, Err(AppError::EmailTransport(_))));
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let mailer = RecordingMailer::default();
        *mailer.permanent_failure.lock().unwrap() = true;
        let dispatcher = NotificationDispatcher::new(mailer);
        let result = dispatcher
            .send_custom("s", "b", &["a@example.edu".into()])
            .await;
        assert!(matches!(result, Err(AppError::EmailTransport(_))));
    }

    #[test]
    fn unknown_placeholders_are_left_untouched() {
        let rendered = render_template(
            "SUBJECT: hi {{name}}\nBody {{missing}}",
            &serde_json::json!({ "name": "Ada" }),
        )
        .unwrap();
        assert_eq!(rendered.subject.as_deref(), Some("hi Ada"));
        assert!(rendered.body.contains("{{missing}}"));
    }
}
