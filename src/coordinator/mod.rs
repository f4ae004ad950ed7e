//! # Cliente do Coordenador
//!
//! O coordenador é o servidor que gera o plano de classificação e recebe os
//! eventos de progresso do agente. Três endpoints, todos com token Bearer:
//!
//! | Método | Caminho                                          | Uso                  |
//! |--------|--------------------------------------------------|----------------------|
//! | GET    | `/api/agent/me`                                  | testar o token       |
//! | GET    | `/api/agent/importaciones/{id}/plan.json`        | baixar o plano       |
//! | POST   | `/api/agent/events`                              | reportar progresso   |
//!
//! Respostas `application/json` são parseadas; qualquer outra coisa volta
//! como string. Status fora de 2xx vira `HTTP {status}: {corpo}`.

#[cfg(test)]
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::{AgentError, AgentResult};
use crate::protocol::{Plan, StepEvent};

/// Timeout de cada requisição ao coordenador.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// O que o orquestrador precisa do coordenador.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn fetch_plan(&self, importacion_id: &str) -> AgentResult<Plan>;

    async fn post_event(&self, event: &StepEvent) -> AgentResult<Value>;
}

/// Cliente HTTP real.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    token: String,
    http: Client,
}

/// `base` sem barras finais + sufixo.
pub fn build_url(base: &str, suffix: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), suffix)
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> AgentResult<Self> {
        let base_url = base_url.into();
        let token = token.into();
        if base_url.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "base_url".to_string(),
            });
        }
        if token.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "token".to_string(),
            });
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url,
            token,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, body), fields(base = %self.base_url))]
    async fn request_json(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&Value>,
    ) -> AgentResult<Value> {
        let url = build_url(&self.base_url, suffix);
        let mut request = self.http.request(method.clone(), &url).bearer_auth(&self.token);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.contains("application/json"));
        let text = response.text().await?;

        let data = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        debug!(method = %method, url = %url, status = status.as_u16(), "Resposta do coordenador");

        if !status.is_success() {
            let body = match data {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(AgentError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(data)
    }

    /// `GET /api/agent/me`: identidade associada ao token.
    pub async fn check_token(&self) -> AgentResult<Value> {
        self.request_json(Method::GET, "/api/agent/me", None).await
    }

    /// Plano cru, sem interpretação.
    pub async fn fetch_plan_raw(&self, importacion_id: &str) -> AgentResult<Value> {
        if importacion_id.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "importacion_id".to_string(),
            });
        }
        let suffix = format!(
            "/api/agent/importaciones/{}/plan.json",
            urlencoding::encode(importacion_id.trim())
        );
        self.request_json(Method::GET, &suffix, None).await
    }
}

#[async_trait]
impl Coordinator for CoordinatorClient {
    async fn fetch_plan(&self, importacion_id: &str) -> AgentResult<Plan> {
        let raw = self.fetch_plan_raw(importacion_id).await?;
        serde_json::from_value(raw)
            .map_err(|e| AgentError::InvalidPlan(e.to_string()))
    }

    async fn post_event(&self, event: &StepEvent) -> AgentResult<Value> {
        let payload = serde_json::to_value(event)
            .map_err(|e| AgentError::Transport(format!("evento não serializável: {}", e)))?;
        self.request_json(Method::POST, "/api/agent/events", Some(&payload))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::protocol::EventStatus;
    use serde_json::Map;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Servidor de uma requisição só; devolve o texto da requisição recebida.
    async fn serve_once(status: &str, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });

        (format!("http://{}/", addr), handle)
    }

    #[test]
    fn test_build_url_trims_trailing_slashes() {
        assert_eq!(build_url("http://x//", "/api/agent/me"), "http://x/api/agent/me");
        assert_eq!(build_url("http://x", "/a"), "http://x/a");
    }

    #[test]
    fn test_requires_token_and_base() {
        assert!(matches!(
            CoordinatorClient::new("http://x", " "),
            Err(AgentError::MissingField { ref field }) if field == "token"
        ));
        assert!(CoordinatorClient::new("", "t").is_err());
    }

    #[tokio::test]
    async fn test_check_token_sends_bearer() {
        let (base, server) = serve_once("200 OK", "application/json", r#"{"ok":true}"#).await;
        let client = CoordinatorClient::new(base, "segredo").unwrap();

        let me = client.check_token().await.unwrap();
        assert_eq!(me["ok"], true);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/agent/me "));
        assert!(request.to_lowercase().contains("authorization: bearer segredo"));
    }

    #[tokio::test]
    async fn test_error_status_keeps_json_body() {
        let (base, _server) =
            serve_once("401 Unauthorized", "application/json", r#"{"detail":"Token inválido"}"#).await;
        let client = CoordinatorClient::new(base, "t").unwrap();

        let err = client.check_token().await.unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 401, .. }));
        assert_eq!(err.to_string(), r#"HTTP 401: {"detail":"Token inválido"}"#);
    }

    #[tokio::test]
    async fn test_non_json_body_is_text() {
        let (base, _server) = serve_once("500 Internal Server Error", "text/html", "boom").await;
        let client = CoordinatorClient::new(base, "t").unwrap();
        let err = client.fetch_plan_raw("7").await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 500: boom");
    }

    #[tokio::test]
    async fn test_fetch_plan_and_post_event() {
        let plan = r#"{"importacion_id": 7, "acciones": [{"factura_id": 1}]}"#;
        let (base, server) = serve_once("200 OK", "application/json; charset=utf-8", plan).await;
        let client = CoordinatorClient::new(base, "t").unwrap();

        let parsed = client.fetch_plan("7").await.unwrap();
        assert_eq!(parsed.items().len(), 1);
        assert!(server
            .await
            .unwrap()
            .starts_with("GET /api/agent/importaciones/7/plan.json "));

        let (base, server) = serve_once("201 Created", "application/json", r#"{"id": 3}"#).await;
        let client = CoordinatorClient::new(base, "t").unwrap();
        let event = StepEvent::new("7", "goto", EventStatus::Ok, "Navigated to x", Map::new());
        client.post_event(&event).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/agent/events "));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""step":"goto""#));
    }

    #[tokio::test]
    async fn test_malformed_plan_is_a_plan_error() {
        let (base, server) =
            serve_once("200 OK", "application/json", r#"{"acciones": "nenhuma"}"#).await;
        let client = CoordinatorClient::new(base, "t").unwrap();

        let err = client.fetch_plan("7").await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, AgentError::InvalidPlan(_)));
        assert_eq!(err.code(), ErrorCode::PLAN_INVALID);
        assert!(err.user_message().starts_with("[E1003] plan.json inválido"));
    }
}
