//! User identity from verified client certificates.
//!
//! The transport layer performs the actual TLS handshake and chain
//! verification and reports what it learned as a [`PeerCertificate`]. This
//! module only decides whether that certificate may log someone in and under
//! which username.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the transport learned about the peer certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificate {
    /// Subject common name.
    pub common_name: Option<String>,
    /// `otherName` UPN entries of the subject alternative names.
    pub user_principal_names: Vec<String>,
    /// The whole chain verified up to a trusted root.
    pub verified: bool,
    /// The certificate purpose allows TLS client authentication.
    pub client_auth_purpose: bool,
}

/// Which certificate field names the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommonNameParseMode {
    /// The subject common name is the username.
    #[default]
    CommonName,
    /// A UPN `user@domain` whose domain matches the BMC hostname.
    UserPrincipalName,
}

/// Extracts the username a certificate logs in as, if any.
pub fn username_from_certificate(
    cert: &PeerCertificate,
    mode: CommonNameParseMode,
    hostname: &str,
) -> Option<String> {
    if !cert.verified {
        debug!("Peer certificate not verified, no mutual TLS session");
        return None;
    }
    if !cert.client_auth_purpose {
        debug!("Chain does not allow certificate to be used for client authentication");
        return None;
    }

    let user = match mode {
        CommonNameParseMode::CommonName => cert.common_name.clone().unwrap_or_default(),
        CommonNameParseMode::UserPrincipalName => {
            if hostname.is_empty() {
                warn!("Failed to get hostname");
                return None;
            }
            cert.user_principal_names
                .iter()
                .filter(|upn| is_upn_match(upn, hostname))
                .find_map(|upn| upn.split_once('@').map(|(user, _)| user.to_string()))
                .unwrap_or_default()
        }
    };

    if user.is_empty() {
        warn!("Failed to get user from peer certificate");
        return None;
    }
    Some(user)
}

/// True when the UPN domain and `hostname` agree label by label, starting
/// from the right, for as many labels as the UPN domain has.
pub fn is_upn_match(upn: &str, hostname: &str) -> bool {
    let Some((_, domain)) = upn.split_once('@') else {
        return false;
    };

    let mut host_labels = hostname.rsplit('.');
    for label in domain.rsplit('.') {
        match host_labels.next() {
            Some(host) if host == label => {}
            _ => return false,
        }
    }
    true
}
