//! Outbound mail delivery.
//!
//! One message per auto-login request: an HTML + plain-text alternative
//! carrying the short-lived token link. Transport mode follows the `mail`
//! configuration: implicit TLS, STARTTLS, or plaintext.

use mail_builder::MessageBuilder;
use mail_send::smtp::message::Message;
use mail_send::SmtpClientBuilder;
use tracing::{debug, instrument};

use crate::config::MailConfig;
use crate::errors::{ApiError, Result};

pub struct Mailer {
    config: MailConfig,
}

impl Mailer {
    pub fn new(config: MailConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Link the recipient follows to redeem the mailed token.
    fn login_url(&self, token: &str) -> String {
        format!(
            "{}/token-login?token={}",
            self.config.site_base_url.trim_end_matches('/'),
            token
        )
    }

    /// Sends the auto-login message for `token` to `to`.
    #[instrument(skip(self, token), fields(to = %to))]
    pub async fn send_auto_login(&self, to: &str, token: &str) -> Result<()> {
        let url = self.login_url(token);
        let site = &self.config.site_name;
        let subject = format!("Sign in to {}", site);
        let text = format!(
            "Hello,\n\nfollow this link to sign in to {}:\n\n{}\n\n\
             The link expires shortly. If you did not request it, you can ignore this message.\n",
            site, url
        );
        let html = format!(
            "<p>Hello,</p><p>follow this link to sign in to {}:</p>\
             <p><a href=\"{}\">{}</a></p>\
             <p>The link expires shortly. If you did not request it, you can ignore this message.</p>",
            site, url, url
        );

        let body = MessageBuilder::new()
            .from((site.as_str(), self.config.sender.as_str()))
            .to(to)
            .subject(subject)
            .text_body(text)
            .html_body(html)
            .write_to_vec()
            .map_err(|e| ApiError::Mailer(e.to_string()))?;

        let message = Message::new(self.config.sender.as_str(), vec![to], body);
        self.deliver(message).await?;
        debug!("Auto-login mail delivered");
        Ok(())
    }

    async fn deliver(&self, message: Message<'_>) -> Result<()> {
        let mut builder = SmtpClientBuilder::new(self.config.host.clone(), self.config.port())
            .implicit_tls(self.config.ssl);
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            builder = builder.credentials((user.clone(), password.clone()));
        }

        if self.config.ssl || self.config.starttls {
            let mut client = builder
                .connect()
                .await
                .map_err(|e| ApiError::Mailer(e.to_string()))?;
            client
                .send(message)
                .await
                .map_err(|e| ApiError::Mailer(e.to_string()))?;
        } else {
            let mut client = builder
                .connect_plain()
                .await
                .map_err(|e| ApiError::Mailer(e.to_string()))?;
            client
                .send(message)
                .await
                .map_err(|e| ApiError::Mailer(e.to_string()))?;
        }
        Ok(())
    }
}
