//! Weather lookup against a wttr.in-style endpoint

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::tool::{SchemaBuilder, Tool, ToolContext};
use crate::ToolError;

static SPECIAL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid location pattern"));

/// Collapse anything but ASCII letters and digits into single spaces
pub fn sanitize_location(location: &str) -> String {
    SPECIAL_CHARS.replace_all(location, " ").trim().to_string()
}

pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
    fillers: Vec<String>,
}

impl WeatherTool {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fillers: vec![
                "Let me check the weather in {location} for you.".to_string(),
                "Let me see what the weather is like in {location} right now.".to_string(),
                // Left open so the follow-up generation completes the sentence
                "The current weather in {location} is ".to_string(),
            ],
        }
    }

    pub fn with_fillers(mut self, fillers: Vec<String>) -> Self {
        self.fillers = fillers;
        self
    }

    fn url(&self, location: &str) -> String {
        format!("{}/{}?format=%C+%t", self.base_url, location)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Called when the user asks about the weather. Returns the weather for the given location."
    }

    fn schema(&self) -> Value {
        SchemaBuilder::new()
            .param("location", "string", "The location to get the weather for", true)
            .non_empty("location")
            .build()
    }

    fn filler_templates(&self) -> Vec<String> {
        self.fillers.clone()
    }

    /// Fillers speak the same cleaned location that is looked up
    fn filler_arguments(&self, args: &Map<String, Value>) -> Map<String, Value> {
        let mut args = args.clone();
        if let Some(Value::String(location)) = args.get_mut("location") {
            *location = sanitize_location(location);
        }
        args
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(10))
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError> {
        let raw = args.get("location").and_then(Value::as_str).unwrap_or_default();
        let location = sanitize_location(raw);
        if location.is_empty() {
            return Err(ToolError::invalid_arguments(self.name(), "location has no letters or digits"));
        }

        tracing::info!(call_id = %ctx.call_id, location = %location, "Getting weather");

        let response = self
            .client
            .get(self.url(&location))
            .send()
            .await
            .map_err(|e| ToolError::failed(format!("weather request failed: {}", e)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ToolError::failed(format!(
                "Failed to get weather data, status code: {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::failed(format!("weather response unreadable: {}", e)))?;

        Ok(format!("The weather in {} is {}.", location, body.trim()))
    }
}
