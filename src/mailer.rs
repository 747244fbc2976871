use anyhow::Context;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials as SmtpCredentials,
    Message, SmtpTransport, Transport,
};
use log::{debug, info};

use crate::{setup::Credentials, utils::make_single_line};

/// A rendered mail ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub trait Mailer {
    fn send(&self, email: &Email) -> anyhow::Result<()>;
}

/// Sends through an authenticated SMTP relay
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpMailer {
    /// Port 465 uses implicit TLS, any other port upgrades with STARTTLS
    pub fn new(credentials: &Credentials) -> anyhow::Result<Self> {
        let config = &credentials.config;
        let from: Mailbox = config
            .email
            .parse()
            .with_context(|| format!("Invalid sender address {:?}", config.email))?;
        let to = config
            .recipient_list()
            .into_iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("Invalid recipient address {addr:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        if to.is_empty() {
            anyhow::bail!("At least one recipient is required");
        }

        let builder = if config.port == 465 {
            SmtpTransport::relay(&config.smtp_server)
        } else {
            SmtpTransport::starttls_relay(&config.smtp_server)
        }
        .with_context(|| format!("Failed to set up SMTP relay for {:?}", config.smtp_server))?;
        let transport = builder
            .port(config.port)
            .credentials(SmtpCredentials::new(
                config.email.clone(),
                credentials.password.clone(),
            ))
            .build();
        debug!(
            "SMTP mailer ready for {}:{} with {} recipient(s)",
            config.smtp_server,
            config.port,
            to.len()
        );
        Ok(Self { transport, from, to })
    }

    fn build_message(&self, email: &Email) -> anyhow::Result<Message> {
        let mut builder = Message::builder().from(self.from.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .subject(&email.subject)
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .context("Failed to build email message")
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, email: &Email) -> anyhow::Result<()> {
        let message = self.build_message(email)?;
        self.transport
            .send(&message)
            .with_context(|| format!("Failed to send email {:?}", email.subject))?;
        info!("Email sent: {}", make_single_line(&email.subject));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::config::tests::sample_config;

    /// Keeps every mail instead of sending it
    #[derive(Clone, Default)]
    pub(crate) struct RecordingMailer {
        pub sent: Rc<RefCell<Vec<Email>>>,
        /// Sending fails once this many mails have been kept
        pub fail_from: Option<usize>,
    }

    impl RecordingMailer {
        pub fn failing_after(count: usize) -> Self {
            Self {
                fail_from: Some(count),
                ..Default::default()
            }
        }

        pub fn subjects(&self) -> Vec<String> {
            self.sent.borrow().iter().map(|e| e.subject.clone()).collect()
        }

        pub fn last(&self) -> Email {
            self.sent.borrow().last().cloned().expect("no mail was sent")
        }
    }

    impl Mailer for RecordingMailer {
        fn send(&self, email: &Email) -> anyhow::Result<()> {
            if self.fail_from.is_some_and(|n| self.sent.borrow().len() >= n) {
                anyhow::bail!("mail server unavailable");
            }
            self.sent.borrow_mut().push(email.clone());
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            config: sample_config(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn builds_for_implicit_tls_and_starttls() {
        let mut credentials = credentials();
        assert!(SmtpMailer::new(&credentials).is_ok());
        credentials.config.port = 587;
        assert!(SmtpMailer::new(&credentials).is_ok());
    }

    #[test]
    fn rejects_invalid_recipient() {
        let mut credentials = credentials();
        credentials.config.recipients = "me@example.com,broken".to_string();

        let err = SmtpMailer::new(&credentials).err().unwrap();

        assert!(format!("{err}").contains("broken"), "{err}");
    }

    #[test]
    fn rejects_empty_recipients() {
        let mut credentials = credentials();
        credentials.config.recipients = " , ".to_string();
        assert!(SmtpMailer::new(&credentials).is_err());
    }

    #[test]
    fn message_is_multipart_to_every_recipient() {
        let mailer = SmtpMailer::new(&credentials()).unwrap();
        let email = Email {
            subject: "[training] Started".to_string(),
            text: "plain body".to_string(),
            html: "<p>html body</p>".to_string(),
        };

        let message = mailer.build_message(&email).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("Subject: [training] Started"), "{formatted}");
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("me@example.com"));
        assert!(formatted.contains("you@example.org"));
        assert!(formatted.contains("plain body"));
        assert!(formatted.contains("<p>html body</p>"));
    }
}
