use crate::error::PartdeskError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

const CHECKOUT: &str = "create-checkout-session";
const PORTAL: &str = "create-portal-session";

/// Redirect target handed back to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUrl {
    pub url: String,
}

/// Client for the serverless functions that open payment provider sessions.
#[derive(Debug, Clone)]
pub struct BillingClient {
    client: reqwest::Client,
    functions_url: String,
}

impl BillingClient {
    pub fn new(functions_url: impl Into<String>) -> Self {
        let functions_url = functions_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            functions_url,
        }
    }

    /// Callers must have verified that the user is a member of the organization.
    pub async fn checkout_session(
        &self,
        organization_id: Uuid,
        token: &str,
    ) -> Result<SessionUrl, PartdeskError> {
        self.call(CHECKOUT, organization_id, token).await
    }

    pub async fn portal_session(
        &self,
        organization_id: Uuid,
        token: &str,
    ) -> Result<SessionUrl, PartdeskError> {
        self.call(PORTAL, organization_id, token).await
    }

    fn endpoint(&self, function: &str) -> String {
        format!("{}/{function}", self.functions_url)
    }

    async fn call(
        &self,
        function: &str,
        organization_id: Uuid,
        token: &str,
    ) -> Result<SessionUrl, PartdeskError> {
        debug!("Calling {function} for {organization_id}");

        let response = self
            .client
            .post(self.endpoint(function))
            .bearer_auth(token)
            .json(&json!({ "organization_id": organization_id }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<SessionUrl>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("{function} failed with {status}: {body}");
        Err(failure(status, &body))
    }
}

/// Map a failed function response onto the error taxonomy. The message reported by
/// the function is surfaced as is.
fn failure(status: StatusCode, body: &str) -> PartdeskError {
    match status {
        StatusCode::UNAUTHORIZED => PartdeskError::Unauthorized,
        StatusCode::FORBIDDEN => PartdeskError::Forbidden,
        _ => PartdeskError::Remote(failure_message(status, body)),
    }
}

fn failure_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    if let Ok(ErrorBody { error }) = serde_json::from_str(body) {
        return error;
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    status
        .canonical_reason()
        .unwrap_or("billing function failed")
        .to_string()
}
