use std::fmt;

use serde::Deserialize;

const WELL_KNOWN_PATH: &str = "/.well-known/cmp";

/// Where a CMP server accepts requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerUrl {
    /// The RFC 6712 well-known URI on `host`, over HTTPS.
    ///
    /// With a `label`, requests go to `/.well-known/cmp/p/<label>`, which servers use to tell
    /// apart CAs or certificate profiles.
    WellKnown {
        /// Host name, optionally with a port.
        host: String,
        label: Option<String>,
    },

    /// Provide an arbitrary URL to post requests to.
    Other(String),
}

impl ServerUrl {
    pub fn well_known(host: impl Into<String>) -> Self {
        ServerUrl::WellKnown {
            host: host.into(),
            label: None,
        }
    }

    pub fn with_label(host: impl Into<String>, label: impl Into<String>) -> Self {
        ServerUrl::WellKnown {
            host: host.into(),
            label: Some(label.into()),
        }
    }

    pub fn to_url(&self) -> String {
        match self {
            ServerUrl::WellKnown { host, label: None } => {
                format!("https://{}{WELL_KNOWN_PATH}", host.trim_end_matches('/'))
            }
            ServerUrl::WellKnown {
                host,
                label: Some(label),
            } => format!(
                "https://{}{WELL_KNOWN_PATH}/p/{}",
                host.trim_end_matches('/'),
                label.trim_matches('/')
            ),
            ServerUrl::Other(url) => url.clone(),
        }
    }
}

impl fmt::Display for ServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known() {
        assert_eq!(
            ServerUrl::well_known("ca.example.com").to_url(),
            "https://ca.example.com/.well-known/cmp"
        );
        assert_eq!(
            ServerUrl::well_known("ca.example.com:8443/").to_url(),
            "https://ca.example.com:8443/.well-known/cmp"
        );
    }

    #[test]
    fn test_label() {
        assert_eq!(
            ServerUrl::with_label("ca.example.com", "devices").to_string(),
            "https://ca.example.com/.well-known/cmp/p/devices"
        );
    }

    #[test]
    fn test_other() {
        let url = ServerUrl::Other("http://127.0.0.1:8080/pkix/".to_owned());
        assert_eq!(url.to_url(), "http://127.0.0.1:8080/pkix/");
    }

    #[test]
    fn test_from_json() {
        let url: ServerUrl =
            serde_json::from_str(r#"{ "well_known": { "host": "ca.test", "label": "iot" } }"#)
                .unwrap();
        assert_eq!(url, ServerUrl::with_label("ca.test", "iot"));
    }
}
