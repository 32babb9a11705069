//! Mail the artifact as an attachment.

use std::io::{Cursor, Write};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::DeployError;
use crate::definition::{BuildDefinitionContent, EmailDeployment};
use crate::variables;

const NOTIFICATION_TEMPLATE: &str = "\
A new build of ${repository} (branch ${branch}) is ready.

Artifact: ${artifact}
Size:     ${size} bytes
Built at: ${built_at}

The artifact is attached to this message.
";

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub starttls: bool,
}

/// Outgoing mail transport.
#[async_trait]
pub trait MailSender: Send + Sync {
    fn sender(&self) -> &Mailbox;

    async fn send(&self, message: Message) -> Result<(), String>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> anyhow::Result<Self> {
        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        let mut builder = builder.port(settings.port);

        if let (Some(user), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: settings.from.parse()?,
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    fn sender(&self) -> &Mailbox {
        &self.from
    }

    async fn send(&self, message: Message) -> Result<(), String> {
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn has_archive_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
        Some("application/zip")
    } else if bytes.starts_with(&[0x1f, 0x8b]) {
        Some("application/gzip")
    } else {
        None
    }
}

/// Attachment name, bytes and MIME type; plain files are zipped first.
fn ensure_compressed(
    name: &str,
    bytes: Vec<u8>,
) -> Result<(String, Vec<u8>, &'static str), zip::result::ZipError> {
    if let Some(mime) = has_archive_magic(&bytes) {
        return Ok((name.to_string(), bytes, mime));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(
        name,
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
    )?;
    zip.write_all(&bytes)?;
    let archive = zip.finish()?.into_inner();
    Ok((format!("{name}.zip"), archive, "application/zip"))
}

fn render_notification(
    content: &BuildDefinitionContent,
    artifact: &str,
    size: usize,
    built_at: DateTime<Utc>,
) -> String {
    let size = size.to_string();
    let built_at = built_at.to_rfc3339();
    variables::substitute(
        NOTIFICATION_TEMPLATE,
        [
            ("repository", content.repository.name.as_str()),
            ("branch", content.repository.branch.as_str()),
            ("artifact", artifact),
            ("size", size.as_str()),
            ("built_at", built_at.as_str()),
        ],
    )
}

pub async fn deploy(
    mailer: &dyn MailSender,
    artifact: &Path,
    target: &EmailDeployment,
    content: &BuildDefinitionContent,
) -> Result<(), DeployError> {
    let fail = |message: String| DeployError::Email {
        address: target.address.clone(),
        message,
    };

    let to: Mailbox = target
        .address
        .parse()
        .map_err(|e| fail(format!("invalid address: {e}")))?;
    let bytes = tokio::fs::read(artifact)
        .await
        .map_err(|e| fail(e.to_string()))?;
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());

    let (attachment_name, attachment, mime) =
        ensure_compressed(&file_name, bytes).map_err(|e| fail(e.to_string()))?;
    let body = render_notification(content, &attachment_name, attachment.len(), Utc::now());
    let content_type = ContentType::parse(mime).map_err(|e| fail(e.to_string()))?;

    let message = Message::builder()
        .from(mailer.sender().clone())
        .to(to)
        .subject(format!("Build artifact for {}", content.repository.name))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(body))
                .singlepart(Attachment::new(attachment_name).body(attachment, content_type)),
        )
        .map_err(|e| fail(e.to_string()))?;

    mailer.send(message).await.map_err(fail)?;
    tracing::info!(address = %target.address, "Artifact mailed");
    Ok(())
}
