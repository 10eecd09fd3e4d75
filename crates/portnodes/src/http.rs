use async_trait::async_trait;
use portcore::{
    Activity, ActivityContext, ActivityError, AsyncActivity, Descriptor, Parameter, Value,
    ValueKind,
};
use std::collections::HashMap;

const URL: Parameter<String> = Parameter::new("url");
const METHOD: Parameter<String> = Parameter::new("method");
const BODY: Parameter<Value> = Parameter::new("body");
const HEADERS: Parameter<serde_json::Value> = Parameter::new("headers");

/// HTTP request activity.
///
/// Transport errors are reported on the `Failed` port; the run continues.
pub struct HttpRequestActivity {
    descriptor: Descriptor,
    client: reqwest::Client,
}

impl HttpRequestActivity {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Use a preconfigured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            descriptor: Descriptor::new("http.request", "HTTP Request")
                .category("http")
                .description("Make HTTP requests")
                .parameter(URL.required())
                .parameter(METHOD.optional(Some("GET")))
                .parameter(BODY.optional(None))
                .parameter(HEADERS.optional(None))
                .input("In")
                .output("Response", ValueKind::Object)
                .output("Failed", ValueKind::String),
            client,
        }
    }

    fn build(&self, ctx: &ActivityContext) -> Result<reqwest::RequestBuilder, ActivityError> {
        let url = ctx.parameter(&URL)?;
        let method = ctx.parameter(&METHOD)?;

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            _ => {
                return Err(ActivityError::InvalidParameter {
                    name: "method".to_string(),
                    expected: "GET, POST, PUT or DELETE".to_string(),
                    actual: method,
                })
            }
        };
        ctx.info(format!("{} {}", method, url));

        let request = match ctx.optional_parameter(&BODY)? {
            Some(Value::String(text)) => request.body(text),
            Some(Value::Null) | None => request,
            Some(other) => request.json(&other.to_json()),
        };

        let headers = match ctx.optional_parameter(&HEADERS)? {
            Some(serde_json::Value::Object(headers)) => headers,
            _ => return Ok(request),
        };
        Ok(headers
            .iter()
            .filter_map(|(name, value)| value.as_str().map(|v| (name, v)))
            .fold(request, |request, (name, value)| request.header(name.as_str(), value)))
    }
}

impl Activity for HttpRequestActivity {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

#[async_trait]
impl AsyncActivity for HttpRequestActivity {
    async fn execute(&self, ctx: &mut ActivityContext) -> Result<(), ActivityError> {
        let request = self.build(ctx)?;

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = format!("HTTP request failed: {}", e);
                ctx.error(message.clone());
                return ctx.fire("Failed", message);
            }
        };

        let status = response.status().as_u16();
        let headers_map: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                let message = format!("Failed to read response: {}", e);
                ctx.error(message.clone());
                return ctx.fire("Failed", message);
            }
        };

        ctx.info(format!("Response status: {}", status));

        let mut result = HashMap::new();
        result.insert("status".to_string(), Value::Number(status as f64));
        result.insert("body".to_string(), Value::String(body_text));
        result.insert("headers".to_string(), Value::Object(headers_map));
        ctx.fire("Response", Value::Object(result))
    }
}
