//! Trust-all HTTP transport for probing servers under test.
//!
//! Certificate and hostname verification are both disabled so the probe can
//! talk to a server using a throwaway self-signed certificate. This module is
//! private to the harness and must never back a production client.

use reqwest::Client;

/// Build a client that accepts any certificate for any host
pub(crate) fn client() -> reqwest::Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .no_proxy()
        .build()
}
