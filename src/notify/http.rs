/// Mail relay client.
///
/// Posts each message as JSON to a transactional mail API:
///
/// ```json
/// { "from": "...", "to": "...", "subject": "...", "text": "..." }
/// ```
///
/// A bearer token is sent when configured. The relay is expected to answer
/// 2xx on acceptance and 422 when it refuses a recipient.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use super::{DeliveryError, Mailer};

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// [`Mailer`] backed by an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::blocking::Client,
    endpoint: String,
    from: String,
    api_token: Option<String>,
}

impl HttpMailer {
    pub fn new(
        endpoint: &str,
        from: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            from: from.to_string(),
            api_token,
        })
    }
}

impl Mailer for HttpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        if self.endpoint.is_empty() {
            return Err(DeliveryError::NotConfigured);
        }

        let payload = RelayRequest {
            from: &self.from,
            to,
            subject,
            text: body,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = rejection_reason(&response.text().unwrap_or_default());
            return Err(DeliveryError::Rejected {
                recipient: to.to_string(),
                reason,
            });
        }
        Err(DeliveryError::Http(status.as_u16()))
    }
}

/// Pulls `message` (or `error`) out of a JSON error body; falls back to the
/// raw text.
fn rejection_reason(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = parsed.as_ref().and_then(|v| {
        v.get("message")
            .or_else(|| v.get("error"))
            .and_then(serde_json::Value::as_str)
    });
    match field {
        Some(reason) => reason.to_string(),
        None if body.trim().is_empty() => "no reason given".to_string(),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves `responses` in order, one connection each, and returns the
    /// relay URL plus a handle yielding the raw request bodies it saw.
    fn one_shot_relay(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/send", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut bodies = Vec::new();
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);

                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request_body = vec![0u8; content_length];
                reader.read_exact(&mut request_body).unwrap();
                bodies.push(String::from_utf8(request_body).unwrap());

                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let mut stream = reader.into_inner();
                stream.write_all(response.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
            bodies
        });

        (url, handle)
    }

    #[test]
    fn test_rejection_reason_prefers_json_message() {
        assert_eq!(rejection_reason(r#"{"message":"mailbox full"}"#), "mailbox full");
        assert_eq!(rejection_reason(r#"{"error":"bad address"}"#), "bad address");
        assert_eq!(rejection_reason("plain refusal\n"), "plain refusal");
        assert_eq!(rejection_reason(""), "no reason given");
    }

    #[test]
    fn test_empty_endpoint_is_not_configured() {
        let mailer = HttpMailer::new("", "alerts@example.com", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            mailer.send("a@example.com", "s", "b"),
            Err(DeliveryError::NotConfigured)
        );
    }

    #[test]
    fn test_unreachable_relay_is_a_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let mailer = HttpMailer::new(
            "http://127.0.0.1:9/send",
            "alerts@example.com",
            Some("token".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        match mailer.send("a@example.com", "s", "b") {
            Err(DeliveryError::Transport(_)) => {}
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_status_codes_map_to_delivery_errors() {
        let (url, relay) = one_shot_relay(vec![
            (422, r#"{"message":"mailbox full"}"#),
            (503, r#"{"error":"relay overloaded"}"#),
            (202, "{}"),
        ]);
        let mailer =
            HttpMailer::new(&url, "alerts@example.com", None, Duration::from_secs(5)).unwrap();

        assert_eq!(
            mailer.send("owner@example.com", "Pool alert", "pH high"),
            Err(DeliveryError::Rejected {
                recipient: "owner@example.com".into(),
                reason: "mailbox full".into(),
            })
        );
        assert_eq!(
            mailer.send("owner@example.com", "Pool alert", "pH high"),
            Err(DeliveryError::Http(503))
        );
        assert_eq!(mailer.send("owner@example.com", "Pool alert", "pH high"), Ok(()));

        let bodies = relay.join().unwrap();
        assert_eq!(bodies.len(), 3);
        let sent: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(sent["to"], "owner@example.com");
        assert_eq!(sent["from"], "alerts@example.com");
        assert_eq!(sent["subject"], "Pool alert");
        assert_eq!(sent["text"], "pH high");
    }
}
