use base64::{engine::general_purpose, Engine};
use serde::de::DeserializeOwned;

use crate::client::Authentication;
use crate::errors::HubError;

/// Thin async facade over `ehttp` for the negotiate exchange and the long
/// polling transport.
pub(crate) struct HttpClient;

impl HttpClient {
    /// Runs one request, bridging the callback API onto a oneshot channel.
    pub(crate) async fn fetch(request: ehttp::Request) -> Result<ehttp::Response, HubError> {
        let (sender, receiver) = futures::channel::oneshot::channel::<Result<ehttp::Response, HubError>>();

        ehttp::fetch(request, move |result| {
            let _ = sender.send(result.map_err(HubError::Transport));
        });

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(HubError::Transport("the request was cancelled".to_string())),
        }
    }

    /// POSTs an empty body and decodes the JSON response.
    pub(crate) async fn post_json<T: 'static + DeserializeOwned + Send>(
        endpoint: String,
        authentication: &Authentication,
    ) -> Result<T, HubError> {
        let mut request = ehttp::Request::post(endpoint, Vec::new());
        Self::apply_authentication(&mut request, authentication);

        let response = Self::fetch(request).await?;
        if !response.ok {
            return Err(HubError::Transport(format!(
                "unexpected HTTP status {} from {}",
                response.status, response.url
            )));
        }

        let text = response
            .text()
            .ok_or_else(|| HubError::Transport("the response body is not text".to_string()))?;

        serde_json::from_str::<T>(text)
            .map_err(|e| HubError::Transport(format!("failed to decode the response: {}, {}", e, text)))
    }

    pub(crate) fn apply_authentication(request: &mut ehttp::Request, authentication: &Authentication) {
        match authentication {
            Authentication::None => {}
            Authentication::Basic { user, password } => {
                request
                    .headers
                    .insert("Authorization", Self::basic_auth(user.clone(), password.clone()));
            }
            Authentication::Bearer { token } => {
                request.headers.insert("Authorization", format!("Bearer {}", token));
            }
        }
    }

    fn basic_auth(username: String, password: Option<String>) -> String {
        let mut encoded = String::new();

        match password {
            Some(password) => {
                general_purpose::STANDARD.encode_string(format!("{}:{}", username, password), &mut encoded)
            }
            None => general_purpose::STANDARD.encode_string(format!("{}:", username), &mut encoded),
        }

        format!("Basic {}", encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_encodes_user_and_password() {
        // RFC 7617 example pair
        assert_eq!(
            HttpClient::basic_auth("Aladdin".to_string(), Some("open sesame".to_string())),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn bearer_token_lands_in_the_authorization_header() {
        let mut request = ehttp::Request::get("http://localhost/hub");
        HttpClient::apply_authentication(&mut request, &Authentication::Bearer { token: "jwt".to_string() });

        let authorization = request
            .headers
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.as_str());
        assert_eq!(authorization, Some("Bearer jwt"));
    }
}
