use x509_cert::name::Name;

use crate::{
    ctx::{TransactionContext, TransactionOptions},
    endpoint::ServerUrl,
    error::*,
    protect::{Protection, Trust},
    trans::HttpConfig,
};

/// Everything a [`Client`](crate::Client) needs to talk to one CA.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) server: ServerUrl,
    pub(crate) sender: Name,
    pub(crate) recipient: Name,
    pub(crate) protection: Protection,
    pub(crate) trust: Trust,
    pub(crate) options: TransactionOptions,
    pub(crate) http: HttpConfig,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn server(&self) -> &ServerUrl {
        &self.server
    }

    pub fn protection(&self) -> &Protection {
        &self.protection
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    /// A fresh context for one transaction with this configuration.
    pub fn new_context(&self) -> TransactionContext {
        TransactionContext::new(
            self.sender.clone(),
            self.recipient.clone(),
            self.protection.clone(),
        )
        .with_trust(self.trust.clone())
        .with_options(self.options.clone())
    }
}

/// Builder for [`ClientConfig`].
///
/// The server URL is required. Sender and recipient default to the empty name, which RFC 4210
/// allows when the sender is identified by senderKID instead.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    server: Option<ServerUrl>,
    sender: Option<Name>,
    recipient: Option<Name>,
    protection: Protection,
    trust: Trust,
    options: TransactionOptions,
    http: HttpConfig,
}

impl ClientConfigBuilder {
    pub fn server(mut self, server: ServerUrl) -> Self {
        self.server = Some(server);
        self
    }

    pub fn sender(mut self, sender: Name) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn recipient(mut self, recipient: Name) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    pub fn trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }

    pub fn options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let server = self
            .server
            .ok_or_else(|| CmpError::invalid_args("server URL is required"))?;

        if self.protection.is_none() && !self.options.unprotected_requests {
            return Err(CmpError::MissingProtection);
        }

        Ok(ClientConfig {
            server,
            sender: self.sender.unwrap_or_default(),
            recipient: self.recipient.unwrap_or_default(),
            protection: self.protection,
            trust: self.trust,
            options: self.options,
            http: self.http,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{protect::MacProtection, txn::State};

    fn mac() -> Protection {
        Protection::Mac(MacProtection::new("ref", "secret"))
    }

    #[test]
    fn test_build() {
        let config = ClientConfig::builder()
            .server(ServerUrl::well_known("ca.test"))
            .sender("CN=device".parse().unwrap())
            .protection(mac())
            .options(TransactionOptions {
                total_timeout: Some(Duration::from_secs(600)),
                ..Default::default()
            })
            .build()
            .unwrap();

        assert_eq!(config.server().to_url(), "https://ca.test/.well-known/cmp");

        let ctx = config.new_context();
        assert_eq!(ctx.state(), State::Idle);
        assert_eq!(ctx.options().total_timeout, Some(Duration::from_secs(600)));
        assert!(!ctx.protection().is_none());
    }

    #[test]
    fn test_server_required() {
        let res = ClientConfig::builder().protection(mac()).build();
        assert!(matches!(res, Err(CmpError::InvalidArgs(_))));
    }

    #[test]
    fn test_protection_required() {
        let res = ClientConfig::builder()
            .server(ServerUrl::well_known("ca.test"))
            .build();
        assert!(matches!(res, Err(CmpError::MissingProtection)));

        let config = ClientConfig::builder()
            .server(ServerUrl::well_known("ca.test"))
            .options(TransactionOptions {
                unprotected_requests: true,
                ..Default::default()
            })
            .build()
            .unwrap();
        assert!(config.protection().is_none());
    }
}
