//! Plain HTTP checks against the app, outside the browser session

use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{E2eError, E2eResult};
use crate::poll::{poll_until, POLL_INTERVAL};

/// Status and body of a response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Build the client shared by all HTTP checks.
///
/// `accept_invalid_certs` mirrors the browser's `ignore_https_errors` so both
/// sides agree on which instances are reachable.
pub fn client(timeout: Duration, accept_invalid_certs: bool) -> E2eResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?)
}

/// GET `url`, optionally with basic auth. Never fails on the status code.
pub async fn authenticated_get(
    client: &reqwest::Client,
    url: &str,
    auth: Option<(&str, &str)>,
) -> E2eResult<HttpResponse> {
    let mut request = client.get(url);
    if let Some((user, password)) = auth {
        request = request.basic_auth(user, Some(password));
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    debug!("GET {} -> {} ({} bytes)", url, status, body.len());

    Ok(HttpResponse { status, body })
}

/// Title phpMyAdmin renders once logged in to the app's database
pub fn admin_title(fqdn: &str, product: &str) -> String {
    format!("{} / mysql | {}", fqdn, product)
}

/// The admin area must reject anonymous requests with 401 and show
/// `marker` to an authenticated one.
pub async fn verify_basic_auth_gate(
    client: &reqwest::Client,
    url: &str,
    user: &str,
    password: &str,
    marker: &str,
) -> E2eResult<()> {
    let anonymous = authenticated_get(client, url, None).await?;
    if anonymous.status != 401 {
        return Err(E2eError::AssertionFailed(format!(
            "expected 401 from {} without credentials, got {}",
            url, anonymous.status
        )));
    }

    let authed = authenticated_get(client, url, Some((user, password))).await?;
    if !authed.body.contains(marker) {
        error!("Unexpected response body from {}:\n{}", url, authed.body);
        return Err(E2eError::AssertionFailed(format!(
            "'{}' not found in response from {} (status {})",
            marker, url, authed.status
        )));
    }

    Ok(())
}

/// Wait until `url` answers with anything below 500.
///
/// Connection errors and gateway errors are expected while the app restarts.
pub async fn wait_for_app(client: &reqwest::Client, url: &str, timeout: Duration) -> E2eResult<()> {
    poll_until(&format!("{} to come up", url), timeout, POLL_INTERVAL, move || async move {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_server_error() => {
                debug!("{} returned {}", url, resp.status());
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) => {
                if !e.is_connect() && !e.is_timeout() {
                    warn!("Health check error: {}", e);
                }
                Ok(false)
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_title() {
        assert_eq!(
            admin_title("test.example.com", "phpMyAdmin"),
            "test.example.com / mysql | phpMyAdmin"
        );
    }
}
