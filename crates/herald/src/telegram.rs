//! Telegram Bot API message sender.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use herald_campaign::{Button, DeliveryError, Message, MessageSender, RecipientId};

/// Default Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const PARSE_MODE: &str = "HTML";

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplyMarkup<'a> {
    inline_keyboard: [[InlineButton<'a>; 1]; 1],
}

impl<'a> From<&'a Button> for ReplyMarkup<'a> {
    fn from(button: &'a Button) -> Self {
        Self {
            inline_keyboard: [[InlineButton {
                text: &button.text,
                url: &button.url,
            }]],
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct SendPhotoRequest<'a> {
    chat_id: &'a str,
    photo: String,
    caption: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup<'a>>,
}

/// The envelope every Bot API response is wrapped in.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends campaign messages through the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    api_url: String,
    token: String,
    media_base_url: Option<String>,
}

impl TelegramSender {
    /// Create a sender for `token` against `api_url`.
    ///
    /// Relative photo references are resolved against `media_base_url`.
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        media_base_url: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            media_base_url: media_base_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    /// Absolute URL of a stored photo reference.
    fn photo_url(&self, photo: &str) -> String {
        if photo.starts_with("http://") || photo.starts_with("https://") {
            return photo.to_string();
        }
        match &self.media_base_url {
            Some(base) => format!("{}/{}", base, photo.trim_start_matches('/')),
            None => photo.to_string(),
        }
    }

    async fn call<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;
        let parsed = serde_json::from_str::<ApiResponse>(&text).ok();

        match parsed {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Some(ApiResponse { description, .. }) => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: description.unwrap_or_else(|| text.clone()),
            }),
            None => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: text,
            }),
        }
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send(&self, recipient: &RecipientId, message: &Message) -> Result<(), DeliveryError> {
        let reply_markup = message.button.as_ref().map(ReplyMarkup::from);

        match &message.photo {
            Some(photo) => {
                let request = SendPhotoRequest {
                    chat_id: recipient.as_str(),
                    photo: self.photo_url(photo),
                    caption: &message.text,
                    parse_mode: PARSE_MODE,
                    reply_markup,
                };
                debug!(recipient = %recipient, photo = %request.photo, "sending photo");
                self.call("sendPhoto", &request).await
            }
            None => {
                let request = SendMessageRequest {
                    chat_id: recipient.as_str(),
                    text: &message.text,
                    parse_mode: PARSE_MODE,
                    reply_markup,
                };
                debug!(recipient = %recipient, "sending message");
                self.call("sendMessage", &request).await
            }
        }
    }
}
