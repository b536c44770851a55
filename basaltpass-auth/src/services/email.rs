use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use service_core::error::AppError;

use crate::config::SmtpConfig;

/// Outbound mail for the console session flows.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_email(
        &self,
        to_email: &str,
        token: &str,
        ui_base_url: &str,
    ) -> Result<(), AppError>;

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
        ui_base_url: &str,
    ) -> Result<(), AppError>;

    async fn send_two_factor_code(&self, to_email: &str, code: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpEmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpEmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid SMTP host: {}", e)))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::BadRequest(e.into()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        // The SMTP transport is blocking.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

fn link_email(heading: &str, intro: &str, link: &str, button: &str, expiry: &str) -> (String, String) {
    let html = format!(
        r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>{heading}</h2>
    <p>{intro}</p>
    <p><a href="{link}" style="background-color: #37474F; color: white; padding: 12px 18px; text-decoration: none; border-radius: 4px;">{button}</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in {expiry}. If you did not ask for it, ignore this email.</p>
  </body>
</html>"#
    );
    let plain = format!(
        "{heading}\n\n{intro}\n\n{link}\n\nThis link expires in {expiry}. If you did not ask for it, ignore this email."
    );
    (plain, html)
}

#[async_trait]
impl EmailProvider for SmtpEmailService {
    async fn send_verification_email(
        &self,
        to_email: &str,
        token: &str,
        ui_base_url: &str,
    ) -> Result<(), AppError> {
        let link = format!("{}/verify-email?token={}", ui_base_url, urlencoding::encode(token));
        let (plain, html) = link_email(
            "Verify your email",
            "Thanks for signing up to BasaltPass. Confirm your address with the link below.",
            &link,
            "Verify email",
            "24 hours",
        );
        self.send_email(to_email, "Verify your email address", plain, html)
            .await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
        ui_base_url: &str,
    ) -> Result<(), AppError> {
        let link = format!("{}/reset-password?token={}", ui_base_url, urlencoding::encode(token));
        let (plain, html) = link_email(
            "Reset your password",
            "We received a request to reset your BasaltPass password.",
            &link,
            "Reset password",
            "1 hour",
        );
        self.send_email(to_email, "Reset your password", plain, html)
            .await
    }

    async fn send_two_factor_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        let plain = format!(
            "Your BasaltPass sign-in code is {code}\n\nIt expires in 5 minutes."
        );
        let html = format!(
            r#"<html><body style="font-family: Arial, sans-serif;"><p>Your BasaltPass sign-in code is</p><h2>{code}</h2><p style="color: #666; font-size: 12px;">It expires in 5 minutes.</p></body></html>"#
        );
        self.send_email(to_email, "Your sign-in code", plain, html)
            .await
    }
}

/// Development provider: logs that a message would have been sent.
#[derive(Clone, Default)]
pub struct LogEmailService;

#[async_trait]
impl EmailProvider for LogEmailService {
    async fn send_verification_email(
        &self,
        _to_email: &str,
        _token: &str,
        _ui_base_url: &str,
    ) -> Result<(), AppError> {
        tracing::info!("SMTP not configured, verification email not sent");
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        _to_email: &str,
        _token: &str,
        _ui_base_url: &str,
    ) -> Result<(), AppError> {
        tracing::info!("SMTP not configured, password reset email not sent");
        Ok(())
    }

    async fn send_two_factor_code(&self, _to_email: &str, _code: &str) -> Result<(), AppError> {
        tracing::info!("SMTP not configured, sign-in code not sent");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Verification,
    PasswordReset,
    TwoFactor,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub kind: EmailKind,
    /// Token or code carried by the message.
    pub secret: String,
}

/// Records every message instead of sending it.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Secret of the newest message of `kind` sent to `to`.
    pub fn last_secret(&self, to: &str, kind: EmailKind) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to == to && m.kind == kind)
            .map(|m| m.secret)
    }

    fn push(&self, to: &str, kind: EmailKind, secret: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentEmail {
                to: to.to_string(),
                kind,
                secret: secret.to_string(),
            });
        }
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_email(
        &self,
        to_email: &str,
        token: &str,
        _ui_base_url: &str,
    ) -> Result<(), AppError> {
        self.push(to_email, EmailKind::Verification, token);
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
        _ui_base_url: &str,
    ) -> Result<(), AppError> {
        self.push(to_email, EmailKind::PasswordReset, token);
        Ok(())
    }

    async fn send_two_factor_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        self.push(to_email, EmailKind::TwoFactor, code);
        Ok(())
    }
}
