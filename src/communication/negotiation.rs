use std::str::FromStr;

use http::Uri;
use log::info;

use crate::client::{Authentication, ConnectionConfiguration};
use crate::communication::common::HttpClient;
use crate::errors::HubError;
use crate::protocol::hub_protocol::HubProtocolKind;
use crate::protocol::negotiate::NegotiateResponse;
use crate::transport::TransportKind;

/// Upper bound on negotiate redirect hops, matching the reference clients.
const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Outcome of a successful negotiation: which transport to build and where to
/// point it.
pub(crate) struct NegotiatedConnection {
    pub kind: TransportKind,
    /// `http(s)` endpoint with the connection `id` query attached.
    pub endpoint: String,
    pub connection_id: Option<String>,
    pub authentication: Authentication,
}

impl NegotiatedConnection {
    /// The websocket flavor of the endpoint: scheme swapped to `ws(s)`, with
    /// the bearer token attached as a query parameter since websocket
    /// upgrades cannot carry an `Authorization` header everywhere.
    pub(crate) fn socket_endpoint(&self) -> Result<Uri, HubError> {
        let mut endpoint = self.endpoint.replacen("http", "ws", 1);

        if let Authentication::Bearer { token } = &self.authentication {
            endpoint = append_query(&endpoint, "access_token", token);
        }

        Uri::from_str(&endpoint).map_err(|e| HubError::Negotiation(format!("invalid endpoint {}: {}", endpoint, e)))
    }
}

/// Runs the negotiate exchange against `{base}/negotiate`, following
/// redirects, and selects the transport to use.
pub(crate) async fn negotiate(configuration: &ConnectionConfiguration) -> Result<NegotiatedConnection, HubError> {
    let mut base = configuration.get_web_url();
    let mut authentication = configuration.authentication();

    if configuration.skips_negotiation() {
        if !configuration.permitted_transports().contains(&TransportKind::WebSockets) {
            return Err(HubError::InvalidOperation(
                "negotiation can only be skipped when the websocket transport is permitted".to_string(),
            ));
        }

        return Ok(NegotiatedConnection {
            kind: TransportKind::WebSockets,
            endpoint: base,
            connection_id: None,
            authentication,
        });
    }

    for _hop in 0..MAX_NEGOTIATE_REDIRECTS {
        let endpoint = format!("{}/negotiate?negotiateVersion=1", base);
        let response = HttpClient::post_json::<NegotiateResponse>(endpoint.clone(), &authentication)
            .await
            .map_err(|e| HubError::Negotiation(format!("negotiate against {} failed: {}", endpoint, e)))?;

        if let Some(url) = response.url {
            info!("Negotiation redirected to {}", url);
            base = url;
            if let Some(token) = response.access_token {
                authentication = Authentication::Bearer { token };
            }
            continue;
        }

        let kind = select_transport(&response, configuration.permitted_transports())?;
        let connection_id = response.connection_id.clone();
        let endpoint = match response.transport_connection_id() {
            Some(id) => append_query(&base, "id", id),
            None => base.clone(),
        };

        info!("Negotiation selected the {} transport", kind.name());
        return Ok(NegotiatedConnection {
            kind,
            endpoint,
            connection_id,
            authentication,
        });
    }

    Err(HubError::Negotiation(format!(
        "giving up after {} negotiate redirects",
        MAX_NEGOTIATE_REDIRECTS
    )))
}

/// Picks the first server-offered transport that is locally permitted and
/// speaks the text transfer format. Server order is preference order.
fn select_transport(response: &NegotiateResponse, permitted: &[TransportKind]) -> Result<TransportKind, HubError> {
    let required_format = HubProtocolKind::Json.transfer_format();

    for available in &response.available_transports {
        let Some(kind) = TransportKind::from_name(&available.transport) else {
            continue;
        };

        if !permitted.contains(&kind) {
            continue;
        }

        if !available.transfer_formats.iter().any(|format| format == required_format) {
            continue;
        }

        return Ok(kind);
    }

    Err(HubError::NoCompatibleTransport)
}

fn append_query(base: &str, key: &str, value: &str) -> String {
    if base.contains('?') {
        format!("{}&{}={}", base, key, value)
    } else {
        format!("{}?{}={}", base, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> NegotiateResponse {
        serde_json::from_str(body).unwrap()
    }

    const BOTH: &[TransportKind] = &[TransportKind::WebSockets, TransportKind::LongPolling];

    #[test]
    fn server_preference_order_wins() {
        let response = response(
            r#"{"connectionId":"c1","availableTransports":[
                {"transport":"LongPolling","transferFormats":["Text"]},
                {"transport":"WebSockets","transferFormats":["Text","Binary"]}
            ]}"#,
        );

        assert_eq!(select_transport(&response, BOTH).unwrap(), TransportKind::LongPolling);
    }

    #[test]
    fn local_permission_filters_the_offer() {
        let response = response(
            r#"{"connectionId":"c1","availableTransports":[
                {"transport":"LongPolling","transferFormats":["Text"]},
                {"transport":"WebSockets","transferFormats":["Text"]}
            ]}"#,
        );

        let selected = select_transport(&response, &[TransportKind::WebSockets]).unwrap();
        assert_eq!(selected, TransportKind::WebSockets);
    }

    #[test]
    fn no_permitted_transport_fails() {
        let response = response(
            r#"{"connectionId":"c1","availableTransports":[
                {"transport":"LongPolling","transferFormats":["Text"]}
            ]}"#,
        );

        let error = select_transport(&response, &[TransportKind::WebSockets]).unwrap_err();
        assert_eq!(error, HubError::NoCompatibleTransport);
    }

    #[test]
    fn unknown_and_binary_only_transports_are_skipped() {
        let response = response(
            r#"{"connectionId":"c1","availableTransports":[
                {"transport":"ServerSentEvents","transferFormats":["Text"]},
                {"transport":"WebSockets","transferFormats":["Binary"]},
                {"transport":"LongPolling","transferFormats":["Text"]}
            ]}"#,
        );

        assert_eq!(select_transport(&response, BOTH).unwrap(), TransportKind::LongPolling);
    }

    #[test]
    fn socket_endpoint_swaps_the_scheme() {
        let negotiated = NegotiatedConnection {
            kind: TransportKind::WebSockets,
            endpoint: "https://example.com/chat?id=token123".to_string(),
            connection_id: Some("c1".to_string()),
            authentication: Authentication::None,
        };

        let uri = negotiated.socket_endpoint().unwrap();
        assert_eq!(uri.scheme_str(), Some("wss"));
        assert_eq!(uri.path_and_query().unwrap().as_str(), "/chat?id=token123");
    }

    #[test]
    fn socket_endpoint_carries_the_bearer_token() {
        let negotiated = NegotiatedConnection {
            kind: TransportKind::WebSockets,
            endpoint: "http://localhost:5220/chat?id=abc".to_string(),
            connection_id: Some("abc".to_string()),
            authentication: Authentication::Bearer { token: "jwt".to_string() },
        };

        let uri = negotiated.socket_endpoint().unwrap();
        assert_eq!(uri.scheme_str(), Some("ws"));
        assert!(uri.query().unwrap().contains("access_token=jwt"));
    }

    #[test]
    fn append_query_handles_both_shapes() {
        assert_eq!(append_query("http://h/hub", "id", "1"), "http://h/hub?id=1");
        assert_eq!(append_query("http://h/hub?a=b", "id", "1"), "http://h/hub?a=b&id=1");
    }
}
