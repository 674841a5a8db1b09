//! Sends a templated message through a local SMTP server.
//!
//! Run a development server (e.g. MailHog or `python -m smtpd`) on
//! `localhost:1025`, then:
//!
//! ```text
//! cargo run -p mailr-smtp --example simple
//! ```

use std::sync::Arc;

use anyhow::Result;
use mailr::{Mailer, MailerConfig, MessageConfig};
use mailr_smtp::{SmtpConfig, SmtpTransport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let host = std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("SMTP_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(1025);

    let config = MailerConfig {
        template_path: concat!(env!("CARGO_MANIFEST_DIR"), "/examples/templates").into(),
        message: MessageConfig::default().default_from("contact@local.dev"),
        ..MailerConfig::default()
    };
    let transport = SmtpTransport::new(SmtpConfig::new(host, port));
    let mailer = Mailer::from_config(Arc::new(transport), config);

    let mut message = mailer.create_message();
    message
        .template("simple")
        .to("receiver@local.dev")
        .subject("A simple email")
        .params(serde_json::json!({
            "title": "A great title",
            "content": "A kickass message !",
        }));
    message.send_and_close().await?;

    println!("Email sent");
    Ok(())
}
