//! Email tool, backed by SMTP via environment configuration.

use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rcore::{Error, ParamSpec, ParamType, Result, ToolSchema};

use super::required_str;
use crate::Registry;

/// Environment variables read at send time.
const ENV_HOST: &str = "REEF_SMTP_HOST";
const ENV_PORT: &str = "REEF_SMTP_PORT";
const ENV_USER: &str = "REEF_SMTP_USER";
const ENV_PASS: &str = "REEF_SMTP_PASS";
const ENV_FROM: &str = "REEF_SMTP_FROM";

pub fn register(registry: &Registry) -> Result<()> {
    registry.register_fn(
        ToolSchema::new("send_email", "Send an email via the configured SMTP account")
            .param(
                "to",
                ParamSpec::required(ParamType::String, "Recipient address"),
            )
            .param(
                "subject",
                ParamSpec::required(ParamType::String, "Subject line"),
            )
            .param(
                "body",
                ParamSpec::required(ParamType::String, "Plain-text body"),
            ),
        |_ctx, params| async move {
            let to = required_str(&params, "to")?.to_string();
            let subject = required_str(&params, "subject")?.to_string();
            let body = required_str(&params, "body")?.to_string();
            tokio::task::spawn_blocking(move || send(&to, &subject, body))
                .await
                .map_err(|e| Error::tool("send_email", std::io::Error::other(e)))?
        },
    )
}

fn send(to: &str, subject: &str, body: String) -> Result<String> {
    let host = std::env::var(ENV_HOST)
        .map_err(|_| Error::Auth(format!("{ENV_HOST} is not set")))?;
    let user = std::env::var(ENV_USER)
        .map_err(|_| Error::Auth(format!("{ENV_USER} is not set")))?;
    let pass = std::env::var(ENV_PASS)
        .map_err(|_| Error::Auth(format!("{ENV_PASS} is not set")))?;
    let from = std::env::var(ENV_FROM).unwrap_or_else(|_| user.clone());
    let port: u16 = std::env::var(ENV_PORT)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(587);

    let from = from
        .parse()
        .map_err(|e| Error::tool("send_email", std::io::Error::other(format!("invalid from address: {e}"))))?;
    let to_addr = to
        .parse()
        .map_err(|e| Error::tool("send_email", std::io::Error::other(format!("invalid recipient: {e}"))))?;
    let message = Message::builder()
        .from(from)
        .to(to_addr)
        .subject(subject)
        .body(body)
        .map_err(|e| Error::tool("send_email", e))?;

    let transport = SmtpTransport::starttls_relay(&host)
        .map_err(|e| Error::tool("send_email", e))?
        .port(port)
        .credentials(Credentials::new(user, pass))
        .build();

    transport
        .send(&message)
        .map_err(|e| Error::tool("send_email", e))?;
    tracing::info!(to, "email sent");
    Ok(format!("email sent to {to}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcore::Ctx;

    #[tokio::test]
    async fn unconfigured_smtp_is_an_auth_error() {
        // The REEF_SMTP_* variables are absent in the test environment.
        let registry = Registry::new();
        register(&registry).unwrap();
        let err = registry
            .execute(
                &Ctx::background(),
                "send_email",
                serde_json::json!({"to": "a@example.com", "subject": "s", "body": "b"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("REEF_SMTP_HOST"));
    }
}
