//! SMS gateway: phone-number provisioning and message delivery.
//!
//! The pipeline and the inbound SMS route only see the [`SmsGateway`] trait;
//! the Twilio REST implementation lives behind it.

use async_trait::async_trait;
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("no phone numbers available")]
    NoNumbersAvailable,

    #[error("phone number not found: {0}")]
    NumberNotFound(String),

    #[error("Twilio API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Twilio request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Buy an SMS-capable number and point its inbound webhook at `sms_url`.
    async fn provision_phone_number(&self, sms_url: &str) -> Result<String, SmsError>;

    /// Release a previously provisioned number.
    async fn release_phone_number(&self, phone_number: &str) -> Result<(), SmsError>;

    /// Send an outbound SMS.
    async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<(), SmsError>;
}

#[derive(Debug, Deserialize)]
struct AvailableNumber {
    phone_number: String,
    capabilities: Capabilities,
}

#[derive(Debug, Deserialize)]
struct Capabilities {
    #[serde(rename = "SMS", default)]
    sms: bool,
}

#[derive(Debug, Deserialize)]
struct AvailableNumbersResponse {
    available_phone_numbers: Vec<AvailableNumber>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumber {
    sid: String,
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct IncomingNumbersResponse {
    incoming_phone_numbers: Vec<IncomingNumber>,
}

pub struct TwilioClient {
    account_sid: String,
    auth_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            account_sid,
            auth_token,
            api_base: DEFAULT_API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}",
            self.api_base, self.account_sid, resource
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SmsError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(SmsError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SmsGateway for TwilioClient {
    async fn provision_phone_number(&self, sms_url: &str) -> Result<String, SmsError> {
        let response = self
            .http
            .get(self.url(
                "AvailablePhoneNumbers/US/Local.json?SmsEnabled=true&PageSize=10",
            ))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let available: AvailableNumbersResponse = Self::check(response).await?.json().await?;

        let candidate = available
            .available_phone_numbers
            .into_iter()
            .find(|number| number.capabilities.sms)
            .ok_or(SmsError::NoNumbersAvailable)?;

        let response = self
            .http
            .post(self.url("IncomingPhoneNumbers.json"))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("PhoneNumber", candidate.phone_number.as_str()),
                ("SmsUrl", sms_url),
            ])
            .send()
            .await?;
        let purchased: IncomingNumber = Self::check(response).await?.json().await?;

        Ok(purchased.phone_number)
    }

    async fn release_phone_number(&self, phone_number: &str) -> Result<(), SmsError> {
        let response = self
            .http
            .get(self.url(&format!(
                "IncomingPhoneNumbers.json?PhoneNumber={}",
                phone_number.replace('+', "%2B")
            )))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let owned: IncomingNumbersResponse = Self::check(response).await?.json().await?;

        let number = owned
            .incoming_phone_numbers
            .into_iter()
            .find(|number| number.phone_number == phone_number)
            .ok_or_else(|| SmsError::NumberNotFound(phone_number.to_string()))?;

        let response = self
            .http
            .delete(self.url(&format!("IncomingPhoneNumbers/{}.json", number.sid)))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<(), SmsError> {
        let response = self
            .http
            .post(self.url("Messages.json"))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", from), ("To", to), ("Body", body)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
