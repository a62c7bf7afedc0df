//! Client for the conversational agent that actually answers questions.
//!
//! The agent runs on the OpenAI Responses API with two tools: the hosted web
//! search and a local Wikipedia lookup. Function calls requested by the model
//! are executed here and fed back until the model produces a final text answer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::tools::WikipediaSearch;

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_MAX_TURNS: usize = 10;
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("rate limited by the model provider, retry in {} seconds", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("model provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("max turns ({0}) exceeded")]
    MaxTurns(usize),
    #[error("model returned no text output")]
    EmptyOutput,
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, instructions: &str, query: &str) -> Result<String, AgentError>;
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_turns: usize,
}

#[derive(Deserialize)]
struct ResponseBody {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct WikipediaArgs {
    query: String,
}

pub struct OpenAiAgent {
    client: reqwest::Client,
    settings: AgentSettings,
    wikipedia: WikipediaSearch,
}

impl OpenAiAgent {
    pub fn new(client: reqwest::Client, settings: AgentSettings, wikipedia: WikipediaSearch) -> Self {
        Self {
            client,
            settings,
            wikipedia,
        }
    }

    fn tools() -> Value {
        json!([{ "type": "web_search_preview" }, WikipediaSearch::definition()])
    }

    async fn create_response(&self, body: &Value) -> Result<ResponseBody, AgentError> {
        let url = format!("{}/responses", self.settings.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(AgentError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .map(|body| body.error.message)
                .unwrap_or(raw);
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn call_tool(&self, name: &str, arguments: &str) -> String {
        if name != WikipediaSearch::NAME {
            log::warn!("Model requested unknown tool '{}'", name);
            return format!("error: unknown tool {}", name);
        }
        let args: WikipediaArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => return format!("error: invalid arguments: {}", e),
        };
        log::info!("Running {} for '{}'", name, args.query);
        match self.wikipedia.search(&args.query).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Wikipedia search failed: {}", e);
                format!("error: {}", e)
            }
        }
    }
}

#[async_trait]
impl AgentRuntime for OpenAiAgent {
    async fn run(&self, instructions: &str, query: &str) -> Result<String, AgentError> {
        let mut input = json!([{ "role": "user", "content": query }]);
        let mut previous_response_id: Option<String> = None;

        for turn in 0..self.settings.max_turns {
            let mut body = json!({
                "model": self.settings.model,
                "instructions": instructions,
                "input": input,
                "tools": Self::tools(),
                "tool_choice": "auto",
            });
            if let Some(id) = &previous_response_id {
                body["previous_response_id"] = json!(id);
            }

            let response = self.create_response(&body).await?;

            let mut text = String::new();
            let mut outputs = Vec::new();
            for item in response.output {
                match item {
                    OutputItem::Message { content } => {
                        for part in content {
                            if let ContentPart::OutputText { text: part } = part {
                                text.push_str(&part);
                            }
                        }
                    }
                    OutputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } => {
                        let output = self.call_tool(&name, &arguments).await;
                        outputs.push(json!({
                            "type": "function_call_output",
                            "call_id": call_id,
                            "output": output,
                        }));
                    }
                    OutputItem::Other => {}
                }
            }

            if outputs.is_empty() {
                if text.trim().is_empty() {
                    return Err(AgentError::EmptyOutput);
                }
                return Ok(text);
            }

            log::info!("Agent turn {} requested {} tool call(s)", turn + 1, outputs.len());
            input = Value::Array(outputs);
            previous_response_id = Some(response.id);
        }

        Err(AgentError::MaxTurns(self.settings.max_turns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agent(server: &MockServer, max_turns: usize) -> OpenAiAgent {
        let client = reqwest::Client::new();
        OpenAiAgent::new(
            client.clone(),
            AgentSettings {
                base_url: format!("{}/v1", server.uri()),
                api_key: "sk-test".into(),
                model: DEFAULT_MODEL.into(),
                max_turns,
            },
            WikipediaSearch::new(client, format!("{}/w/api.php", server.uri())),
        )
    }

    fn text_response(id: &str, text: &str) -> Value {
        json!({
            "id": id,
            "output": [
                { "type": "web_search_call", "id": "ws_1", "status": "completed" },
                { "type": "message", "role": "assistant", "content": [
                    { "type": "output_text", "text": text, "annotations": [] }
                ] }
            ]
        })
    }

    #[tokio::test]
    async fn returns_final_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4.1",
                "tool_choice": "auto",
                "input": [{ "role": "user", "content": "hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("resp_1", "Hi there.")))
            .expect(1)
            .mount(&server)
            .await;

        let answer = agent(&server, 10).run("be nice", "hello").await.unwrap();
        assert_eq!(answer, "Hi there.");
    }

    #[tokio::test]
    async fn runs_wikipedia_tool_then_answers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(body_partial_json(json!({ "previous_response_id": "resp_1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("resp_2", "Paris.")))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_1",
                "output": [{
                    "type": "function_call",
                    "id": "fc_1",
                    "call_id": "call_1",
                    "name": "wikipedia_search",
                    "arguments": "{\"query\":\"capital of France\"}"
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("list", "search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": { "search": [] }
            })))
            .mount(&server)
            .await;

        let answer = agent(&server, 10).run("be nice", "capital of France?").await.unwrap();
        assert_eq!(answer, "Paris.");

        let requests = server.received_requests().await.unwrap();
        let follow_up = requests
            .iter()
            .filter(|r| r.url.path() == "/v1/responses")
            .nth(1)
            .expect("second model call");
        let body: Value = serde_json::from_slice(&follow_up.body).unwrap();
        assert_eq!(body["input"][0]["type"], "function_call_output");
        assert_eq!(body["input"][0]["call_id"], "call_1");
        assert_eq!(body["input"][0]["output"], crate::tools::NO_RESULT);
    }

    #[tokio::test]
    async fn too_many_requests_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let err = agent(&server, 10).run("x", "y").await.unwrap_err();
        match err {
            AgentError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(12))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn api_error_carries_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
            })))
            .mount(&server)
            .await;

        let err = agent(&server, 10).run("x", "y").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "model provider returned 401: Incorrect API key provided"
        );
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_max_turns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_loop",
                "output": [{
                    "type": "function_call",
                    "call_id": "call_x",
                    "name": "lookup_weather",
                    "arguments": "{}"
                }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let err = agent(&server, 2).run("x", "y").await.unwrap_err();
        assert!(matches!(err, AgentError::MaxTurns(2)));
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "r", "output": [] })))
            .mount(&server)
            .await;

        let err = agent(&server, 10).run("x", "y").await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyOutput));
    }
}
