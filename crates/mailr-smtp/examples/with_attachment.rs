//! Sends a message with an inline image referenced by `cid:`.
//!
//! ```text
//! cargo run -p mailr-smtp --example with_attachment -- ./assets/img_1.png
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use mailr::{AttachmentOptions, Mailer, MailerConfig, MessageConfig};
use mailr_smtp::{SmtpConfig, SmtpTransport};
use tracing_subscriber::EnvFilter;

const CID: &str = "rick_morty_img";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let image = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./assets/img_1.png".into());

    let config = MailerConfig {
        template_path: concat!(env!("CARGO_MANIFEST_DIR"), "/examples/templates").into(),
        message: MessageConfig::default().default_from("No-reply <no-reply@local.dev>"),
        ..MailerConfig::default()
    };
    let transport = SmtpTransport::new(SmtpConfig::new("localhost", 1025));
    let mailer = Mailer::from_config(Arc::new(transport), config);

    let mut message = mailer.create_message();
    message
        .template("simple")
        .to("contact@local.dev")
        .subject("Mon super email avec pièce jointe")
        .attachment(&image, Some("Rick_Morty.png"), &AttachmentOptions::new().cid(CID))
        .with_context(|| format!("cannot attach {image}"))?
        .params(serde_json::json!({
            "title": "Mon super titre",
            "content": "Mon super message avec pièce jointe !",
            "cid": CID,
        }));
    message.send_and_close().await?;

    println!("Email sent");
    Ok(())
}
