//! OpenAI 互換 API を使った collaborator 実装
//!
//! - `OpenAiChat`: chat/completions で Normalizer / Merger / CompletenessJudge / UnitParser を実装
//! - `OpenAiTranscriber`: audio/transcriptions で Transcriber を実装
//!
//! LLM の返答は ```json フェンス内（無ければ全体）を JSON として読み、
//! `caption` フィールドを取り出します（`extract_caption`）。
//! semantic unit は同じフェンスの中身を unit の配列として読みます（`extract_units`）。

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::domain::{CollaboratorError, CollaboratorKind, SemanticUnit};
use crate::ports::{CompletenessJudge, Merger, Normalizer, Transcriber, UnitParser};

const DEFAULT_TEMPERATURE: f32 = 0.6;

fn normalization_prompt(raw: &str) -> String {
    format!(
        r#"You are a speech normalization tool. The following is the result of speech-to-text conversion. Please normalize the text.
Only keep the normalized text, do not modify fine-grained details, just remove noise caused by speech.
Input text: {raw}
Strictly follow the output format below:
Output example:
```json
{{"caption": "This is a car"}}
```
"#
    )
}

fn integration_prompt(consensus: &str, input: &str) -> String {
    format!(
        r#"You are a text integration expert. caption1 is the original annotation result, caption2 is the annotator's supplement.

Notes:
1. caption2 may correct or add missing details to caption1.
2. Merge identical semantic parts, avoid duplication.
3. Insert new content in the appropriate place.
4. In case of conflict, caption2 prevails.

Input:
caption1: {consensus}
caption2: {input}
Strictly follow this output format:
```json
{{"caption": "There are 5 airplanes parked in the airport..."}}
```
"#
    )
}

fn completeness_prompt(input: &str) -> String {
    format!(
        r#"You are asked to judge whether the image has been fully annotated. Input is one caption.
If the caption means 'I think that's all', 'I think it's complete', etc., then output 0.

Input:
    caption: {input}

Output:
```json
{{"caption": "0"}}
```
"#
    )
}

fn refinement_prompt(caption: &str) -> String {
    format!(
        r#"Please help me improve the following caption according to the steps below.
Special attention:
1. Correct obvious typos.
2. Remove meaningless connecting words such as "then," "and," "furthermore," and "next."
3. Output in English.
4. Format the output according to the sample provided.
Input caption:{caption}
Output example:
```json
{{"caption": "this is a image of the tiger."}}
```
"#
    )
}

fn unit_parsing_prompt(caption: &str) -> String {
    format!(
        r#"Please help me extract and segment the minimum semantic unit based on the following rules and reference the output example.
1. Unit Definition: Minimum semantic unit = object name + associated attributes; a single sentence may contain multiple independent units; each unit must contain only one object name.
2. Attribute Specifications: Valid attributes: absolute_location (position in the overall image), relative_location (position relative to other objects), colour, amount (extract indefinite articles "a"/"an", numerical values and quantifiers), size, shape, material, object_description, other (all other unclassified attributes, as a list). Omit attributes that do not exist; no attribute overlap or duplication; pronoun-based locations must be replaced with the referenced objects.
3. Extraction Principles: Extract the "name" field separately; create independent units for multiple objects sharing attributes; absolute and relative locations cannot coexist in the same unit; omit unspecified or ambiguous attributes.
4. Output Requirements: Present only final results without reasoning processes.

Input text:{caption}

Input Example: "This is a satellite remote sensing image of a tennis court area, with ten blue tennis courts in the middle. In the upper left corner of the picture, there is a dense forest."
Output Example:
```json
[
    {{"name": "image", "attributes": {{"amount": "a", "object_description": "satellite remote sensing", "other": ["of a tennis court area"]}}}},
    {{"name": "tennis court", "attributes": {{"amount": "10", "colour": "blue", "absolute_location": "at the center of picture"}}}},
    {{"name": "forest", "attributes": {{"amount": "a", "object_description": "dense", "absolute_location": "in the upper left corner of the picture"}}}}
]
```
"#
    )
}

/// Pull the `caption` out of a model reply.
///
/// Uses the first ```json fenced block when there is one, the whole reply otherwise.
/// A bare JSON string is accepted as the caption itself.
pub fn extract_caption(kind: CollaboratorKind, reply: &str) -> Result<String, CollaboratorError> {
    let body = fenced_json(reply).unwrap_or(reply).trim();
    let unparseable = || CollaboratorError::Unparseable {
        kind,
        reply: reply.to_string(),
    };

    let value: serde_json::Value = serde_json::from_str(body).map_err(|_| unparseable())?;
    match value {
        serde_json::Value::Object(mut fields) => match fields.remove("caption") {
            Some(serde_json::Value::String(caption)) => Ok(caption),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            _ => Err(unparseable()),
        },
        serde_json::Value::String(caption) => Ok(caption),
        _ => Err(unparseable()),
    }
}

/// Read a list of semantic units out of a model reply.
///
/// Same fence rule as `extract_caption`. A single unit object is accepted as a list of one.
pub fn extract_units(kind: CollaboratorKind, reply: &str) -> Result<Vec<SemanticUnit>, CollaboratorError> {
    let body = fenced_json(reply).unwrap_or(reply).trim();
    let unparseable = || CollaboratorError::Unparseable {
        kind,
        reply: reply.to_string(),
    };

    let value: serde_json::Value = serde_json::from_str(body).map_err(|_| unparseable())?;
    let units: Result<Vec<SemanticUnit>, serde_json::Error> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        serde_json::Value::Object(_) => serde_json::from_value(value).map(|unit| vec![unit]),
        _ => return Err(unparseable()),
    };
    units.map_err(|_| unparseable())
}

fn fenced_json(reply: &str) -> Option<&str> {
    let start = reply.find("```json")? + "```json".len();
    let rest = &reply[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn request_error(
    kind: CollaboratorKind,
) -> impl FnOnce(reqwest::Error) -> CollaboratorError {
    move |e| CollaboratorError::Request {
        kind,
        source: Box::new(e),
    }
}

/// Chat-completions client shared by the three text collaborators.
#[derive(Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        }
    }

    /// Send one user message and return the reply text.
    async fn complete(&self, kind: CollaboratorKind, prompt: &str) -> Result<String, CollaboratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error(kind))?
            .json()
            .await
            .map_err(request_error(kind))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CollaboratorError::Unparseable {
                kind,
                reply: "<no choices>".to_string(),
            })
    }

    async fn caption(&self, kind: CollaboratorKind, prompt: &str) -> Result<String, CollaboratorError> {
        let reply = self.complete(kind, prompt).await?;
        tracing::debug!(%kind, reply = %reply, "llm reply");
        extract_caption(kind, &reply)
    }
}

#[async_trait]
impl Normalizer for OpenAiChat {
    async fn normalize(&self, raw: &str) -> Result<String, CollaboratorError> {
        self.caption(CollaboratorKind::Normalizer, &normalization_prompt(raw))
            .await
    }
}

#[async_trait]
impl Merger for OpenAiChat {
    async fn merge(&self, consensus: &str, input: &str) -> Result<String, CollaboratorError> {
        self.caption(CollaboratorKind::Merger, &integration_prompt(consensus, input))
            .await
    }
}

#[async_trait]
impl CompletenessJudge for OpenAiChat {
    async fn is_complete(&self, input: &str) -> Result<bool, CollaboratorError> {
        let verdict = self
            .caption(CollaboratorKind::Judge, &completeness_prompt(input))
            .await?;
        Ok(verdict.trim() == "0")
    }
}

#[async_trait]
impl UnitParser for OpenAiChat {
    async fn refine(&self, caption: &str) -> Result<String, CollaboratorError> {
        self.caption(CollaboratorKind::UnitParser, &refinement_prompt(caption))
            .await
    }

    async fn parse_units(&self, caption: &str) -> Result<Vec<SemanticUnit>, CollaboratorError> {
        let kind = CollaboratorKind::UnitParser;
        let reply = self.complete(kind, &unit_parsing_prompt(caption)).await?;
        tracing::debug!(%kind, reply = %reply, "llm reply");
        extract_units(kind, &reply)
    }
}

/// Speech-to-text over the transcription endpoint.
#[derive(Clone)]
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/audio/transcriptions",
                config.api_base.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config
                .transcription_model
                .clone()
                .unwrap_or_else(|| "whisper-1".to_string()),
        }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String, CollaboratorError> {
        let kind = CollaboratorKind::Transcriber;
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| CollaboratorError::Request {
                kind,
                source: Box::new(e),
            })?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: TranscriptionResponse = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error(kind))?
            .json()
            .await
            .map_err(request_error(kind))?;
        Ok(response.text)
    }
}
