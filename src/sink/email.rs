//! SMTP delivery: each image is sent as an attachment to a fixed address.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Destination, Sink, SinkError};
use crate::store::StoredImage;

const SUBJECT: &str = "New Photo from iCloud Album";
const BODY: &str = "A new photo has been added to the shared album.";

/// SMTP account and recipient.
#[derive(Clone)]
pub struct EmailSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Reply-To address. Some servers reject a From that differs from the
    /// authenticated user, so this never replaces From.
    pub from: Option<String>,
    pub destination: String,
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("destination", &self.destination)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Wrapper,
    /// STARTTLS, failing if the server does not offer it.
    Required,
    /// STARTTLS when offered, plaintext otherwise.
    Opportunistic,
}

/// TLS modes to try in order for a given port.
fn tls_attempts(port: u16) -> &'static [TlsMode] {
    match port {
        465 => &[TlsMode::Wrapper],
        25 => &[TlsMode::Required, TlsMode::Opportunistic],
        _ => &[TlsMode::Opportunistic],
    }
}

pub struct EmailSink {
    settings: EmailSettings,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

impl EmailSink {
    pub const NAME: &'static str = "email";

    /// Validate addresses up front so a typo fails at startup rather than
    /// on every delivery.
    pub fn new(settings: EmailSettings) -> Result<Self, SinkError> {
        let from: Mailbox = settings.username.parse()?;
        let reply_to = match settings.from.as_deref() {
            Some(addr) if !addr.is_empty() && addr != settings.username => {
                Some(addr.parse::<Mailbox>()?)
            }
            _ => None,
        };
        settings.destination.parse::<Mailbox>()?;

        Ok(Self {
            settings,
            from,
            reply_to,
        })
    }

    fn build_message(
        &self,
        image: &StoredImage,
        bytes: Vec<u8>,
        to: Mailbox,
    ) -> Result<Message, SinkError> {
        let content_type = ContentType::parse(image.format.mime_type())
            .map_err(|e| SinkError::Message(e.to_string()))?;

        let mut builder = Message::builder().from(self.from.clone()).to(to);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        builder
            .subject(SUBJECT)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(BODY.to_string()))
                    .singlepart(Attachment::new(image.file_name()).body(bytes, content_type)),
            )
            .map_err(|e| SinkError::Message(e.to_string()))
    }

    fn transport(&self, mode: TlsMode) -> Result<AsyncSmtpTransport<Tokio1Executor>, SinkError> {
        let params = TlsParameters::builder(self.settings.server.clone())
            .dangerous_accept_invalid_certs(self.settings.accept_invalid_certs)
            .build()?;
        let tls = match mode {
            TlsMode::Wrapper => Tls::Wrapper(params),
            TlsMode::Required => Tls::Required(params),
            TlsMode::Opportunistic => Tls::Opportunistic(params),
        };

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.settings.server)
                .port(self.settings.port)
                .tls(tls)
                .credentials(Credentials::new(
                    self.settings.username.clone(),
                    self.settings.password.clone(),
                ))
                .timeout(Some(self.settings.timeout))
                .build(),
        )
    }
}

#[async_trait]
impl Sink for EmailSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn resolve_destination(&self) -> Result<Destination, SinkError> {
        Ok(Destination::new(self.settings.destination.clone()))
    }

    async fn deliver(&self, image: &StoredImage, destination: &Destination) -> Result<(), SinkError> {
        let to: Mailbox = destination.as_str().parse()?;
        let bytes = tokio::fs::read(&image.path)
            .await
            .map_err(|e| SinkError::Attachment {
                path: image.path.clone(),
                source: e,
            })?;
        let message = self.build_message(image, bytes, to)?;

        let mut last_err: Option<(TlsMode, lettre::transport::smtp::Error)> = None;
        for &mode in tls_attempts(self.settings.port) {
            if let Some((previous, e)) = &last_err {
                tracing::debug!(
                    "SMTP send with {:?} failed ({}), retrying with {:?}",
                    previous,
                    e,
                    mode
                );
            }
            match self.transport(mode)?.send(message.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some((mode, e)),
            }
        }

        Err(last_err.map_or_else(
            || SinkError::Message("no SMTP transport attempted".into()),
            |(_, e)| SinkError::Smtp(e),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fingerprint, ImageFormat};
    use std::path::PathBuf;

    fn settings() -> EmailSettings {
        EmailSettings {
            server: "127.0.0.1".into(),
            port: 1025,
            username: "bridge@example.com".into(),
            password: "hunter2".into(),
            from: Some("photos@example.com".into()),
            destination: "frame@example.com".into(),
            accept_invalid_certs: true,
            timeout: Duration::from_secs(5),
        }
    }

    fn image() -> StoredImage {
        StoredImage {
            fingerprint: Fingerprint::of(b"img"),
            path: PathBuf::from("/nonexistent/img.png"),
            format: ImageFormat::Png,
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn test_tls_attempts_by_port() {
        assert_eq!(tls_attempts(465), &[TlsMode::Wrapper]);
        assert_eq!(tls_attempts(25), &[TlsMode::Required, TlsMode::Opportunistic]);
        assert_eq!(tls_attempts(587), &[TlsMode::Opportunistic]);
        assert_eq!(tls_attempts(1025), &[TlsMode::Opportunistic]);
    }

    #[test]
    fn test_invalid_destination_rejected_at_construction() {
        let mut s = settings();
        s.destination = "not an address".into();
        assert!(matches!(EmailSink::new(s), Err(SinkError::Address(_))));
    }

    #[test]
    fn test_invalid_username_rejected_at_construction() {
        let mut s = settings();
        s.username = "bridge".into();
        assert!(matches!(EmailSink::new(s), Err(SinkError::Address(_))));
    }

    #[test]
    fn test_reply_to_only_when_different() {
        let sink = EmailSink::new(settings()).unwrap();
        assert!(sink.reply_to.is_some());

        let mut s = settings();
        s.from = Some(s.username.clone());
        assert!(EmailSink::new(s).unwrap().reply_to.is_none());

        let mut s = settings();
        s.from = Some(String::new());
        assert!(EmailSink::new(s).unwrap().reply_to.is_none());
    }

    #[test]
    fn test_message_headers_and_attachment() {
        let sink = EmailSink::new(settings()).unwrap();
        let img = image();
        let to: Mailbox = "frame@example.com".parse().unwrap();
        let message = sink.build_message(&img, b"png-bytes".to_vec(), to).unwrap();
        let text = formatted(&message);

        assert!(text.contains("From: bridge@example.com"));
        assert!(text.contains("Reply-To: photos@example.com"));
        assert!(text.contains("To: frame@example.com"));
        assert!(text.contains("Subject: New Photo from iCloud Album"));
        assert!(text.contains(BODY));
        assert!(text.contains("image/png"));
        assert!(text.contains(&img.file_name()));
    }

    #[tokio::test]
    async fn test_resolve_destination_is_configured_address() {
        let sink = EmailSink::new(settings()).unwrap();
        let dest = sink.resolve_destination().await.unwrap();
        assert_eq!(dest.as_str(), "frame@example.com");
        assert_eq!(sink.name(), "email");
    }

    #[tokio::test]
    async fn test_missing_file_is_attachment_error() {
        let sink = EmailSink::new(settings()).unwrap();
        let dest = sink.resolve_destination().await.unwrap();
        let err = sink.deliver(&image(), &dest).await.unwrap_err();
        assert!(matches!(err, SinkError::Attachment { .. }));
    }
}
