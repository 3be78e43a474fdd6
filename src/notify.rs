use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{error, info};

use crate::config::MailConfig;
use crate::db::ScrapePass;

const FOOTER: &str = "This is an automated message.\nPlease do not reply to this message.";

/// Failure of one delivery, tagged with the phase it happened in.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("unable to build message: {0}")]
    Compose(String),

    #[error("unable to connect to email server: {0}")]
    Connect(String),

    #[error("unable to login to email server: {0}")]
    Authenticate(String),

    #[error("unable to send message: {0}")]
    Send(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

pub fn subject(feed: &str, count: usize) -> String {
    format!("{} {} new ads found", feed, count)
}

/// One block per new ad, then the footer.
pub fn digest_body(pass: &ScrapePass) -> String {
    let mut body = String::new();
    for ad in pass.iter() {
        body.push_str(&format!(
            "{} - {} - {} - {}\n{}\n\n",
            ad.title, ad.price, ad.location, ad.posted, ad.url
        ));
    }
    body.push_str(FOOTER);
    body
}

pub struct Notifier<'a> {
    transport: &'a dyn MailTransport,
    sender: &'a str,
    recipients: &'a [String],
}

impl<'a> Notifier<'a> {
    pub fn new(
        transport: &'a dyn MailTransport,
        sender: &'a str,
        recipients: &'a [String],
    ) -> Self {
        Self {
            transport,
            sender,
            recipients,
        }
    }

    /// Mail the digest to every recipient. Returns one outcome per recipient; an
    /// empty pass sends nothing.
    pub async fn notify(
        &self,
        feed: &str,
        pass: &ScrapePass,
    ) -> Vec<(String, Result<(), NotifyError>)> {
        if pass.is_empty() {
            info!("{}: no new ads found", feed);
            return Vec::new();
        }

        let subject = subject(feed, pass.len());
        let mut outcomes = Vec::with_capacity(self.recipients.len());
        for recipient in self.recipients {
            let body = digest_body(pass);
            let result = self.transport.send(self.sender, recipient, &subject, &body).await;
            match &result {
                Ok(()) => info!("{}: digest delivered to {}", feed, recipient),
                Err(e) => error!("{}: delivery to {} failed: {}", feed, recipient, e),
            }
            outcomes.push((recipient.clone(), result));
        }
        outcomes
    }
}

/// STARTTLS SMTP relay, authenticated with the sender's credentials.
pub struct SmtpMailer {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(mail: &MailConfig, timeout: Duration) -> Self {
        Self {
            host: mail.smtp_host.clone(),
            port: mail.smtp_port,
            username: mail.sender.clone(),
            password: mail.password.clone().unwrap_or_default(),
            timeout,
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| NotifyError::Compose(format!("sender {}: {}", from, e)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Compose(format!("recipient {}: {}", to, e)))?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Compose(e.to_string()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| NotifyError::Connect(e.to_string()))?
            .port(self.port)
            .timeout(Some(self.timeout))
            .credentials(Credentials::new(self.username.clone(), self.password.clone()))
            .build();

        // Opening a connection also logs in; a permanent rejection there is an auth failure.
        match transport.test_connection().await {
            Ok(true) => {}
            Ok(false) => return Err(NotifyError::Connect("server closed the connection".into())),
            Err(e) if e.is_permanent() => return Err(NotifyError::Authenticate(e.to_string())),
            Err(e) => return Err(NotifyError::Connect(e.to_string())),
        }

        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{MailTransport, NotifyError};

    #[derive(Debug, Clone)]
    pub struct SentMail {
        pub from: String,
        pub to: String,
        pub subject: String,
        pub body: String,
    }

    /// Records every message; recipients listed in `reject` fail at login.
    #[derive(Default)]
    pub struct FakeMailer {
        pub reject: Vec<String>,
        pub sent: Mutex<Vec<SentMail>>,
    }

    impl FakeMailer {
        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailTransport for FakeMailer {
        async fn send(
            &self,
            from: &str,
            to: &str,
            subject: &str,
            body: &str,
        ) -> Result<(), NotifyError> {
            if self.reject.iter().any(|r| r == to) {
                return Err(NotifyError::Authenticate("535 bad credentials".into()));
            }
            self.sent.lock().unwrap().push(SentMail {
                from: from.to_string(),
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::sample_record;

    fn pass_of(ids: &[u64]) -> ScrapePass {
        let mut pass = ScrapePass::default();
        for id in ids {
            pass.insert(sample_record(*id, &format!("Car {}", id)));
        }
        pass
    }

    #[test]
    fn digest_layout() {
        let body = digest_body(&pass_of(&[7]));
        assert_eq!(
            body,
            "Car 7 - $1,200 - Ottawa - 2 hours ago\nhttp://www.kijiji.ca/v-cars/ottawa/7\n\n\
             This is an automated message.\nPlease do not reply to this message."
        );
        assert_eq!(subject("cars", 3), "cars 3 new ads found");
    }

    #[tokio::test]
    async fn empty_pass_sends_nothing() {
        let mailer = FakeMailer::default();
        let recipients = vec!["a@example.com".to_string()];
        let outcomes = Notifier::new(&mailer, "me@example.com", &recipients)
            .notify("cars", &ScrapePass::default())
            .await;
        assert!(outcomes.is_empty());
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn one_digest_per_recipient() {
        let mailer = FakeMailer::default();
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let outcomes = Notifier::new(&mailer, "me@example.com", &recipients)
            .notify("cars", &pass_of(&[1, 2]))
            .await;

        assert_eq!(outcomes.len(), 2);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "a@example.com");
        assert_eq!(sent[1].to, "b@example.com");
        assert!(sent.iter().all(|m| m.subject == "cars 2 new ads found"));
        assert!(sent.iter().all(|m| m.from == "me@example.com"));
        assert!(sent[0].body.contains("Car 1 - ") && sent[0].body.contains("Car 2 - "));
    }

    #[tokio::test]
    async fn failed_recipient_does_not_block_others() {
        let mailer = FakeMailer {
            reject: vec!["a@example.com".to_string()],
            ..Default::default()
        };
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let outcomes = Notifier::new(&mailer, "me@example.com", &recipients)
            .notify("cars", &pass_of(&[1]))
            .await;

        assert!(matches!(outcomes[0].1, Err(NotifyError::Authenticate(_))));
        assert!(outcomes[1].1.is_ok());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn smtp_rejects_bad_address_before_connecting() {
        let mail = MailConfig {
            sender: "me@example.com".into(),
            password: None,
            recipients: vec![],
            smtp_host: "smtp.invalid".into(),
            smtp_port: 587,
        };
        let mailer = SmtpMailer::new(&mail, Duration::from_secs(1));
        let err = mailer
            .send("me@example.com", "not an address", "s", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Compose(_)));
    }

    #[tokio::test]
    async fn smtp_refused_connection_is_connect_error() {
        let mail = MailConfig {
            sender: "me@example.com".into(),
            password: Some("secret".into()),
            recipients: vec![],
            smtp_host: "127.0.0.1".into(),
            // Nothing listens on tcpmux.
            smtp_port: 1,
        };
        let mailer = SmtpMailer::new(&mail, Duration::from_secs(2));
        let err = mailer
            .send("me@example.com", "you@example.com", "s", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Connect(_)), "got {:?}", err);
    }
}
