// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversational webhook for the job-search agent.
//!
//! Requests and responses follow the Dialogflow CX webhook envelope: the
//! fulfillment tag selects a handler, and session parameters carry the
//! user's state between turns.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::errors::{ServiceError, ServiceResult};
use crate::generation::{cover_letter_prompt, GenerationRequest};
use crate::model::JobMatch;
use crate::pipeline::embed_text;
use crate::services::Services;

const DEFAULT_FOLDER_NAME: &str = "job-search";
const RESUME_TITLE: &str = "Resume";
const MATCHES_TITLE: &str = "Job matches";
const COVER_LETTER_SYSTEM: &str =
    "You are a career coach who writes tailored, honest cover letters.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Incoming webhook call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    #[serde(default)]
    pub fulfillment_info: FulfillmentInfo,
    #[serde(default)]
    pub session_info: SessionInfo,
    /// The user's last utterance, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageText {
    pub text: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub text: MessageText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentResponse {
    pub messages: Vec<ResponseMessage>,
}

/// Webhook reply with updated session parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub fulfillment_response: FulfillmentResponse,
    pub session_info: SessionInfo,
}

impl WebhookResponse {
    /// First line of the first message, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.fulfillment_response
            .messages
            .first()
            .and_then(|m| m.text.text.first())
            .map(String::as_str)
    }
}

/// Typed view over the session parameters; unknown keys are carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<JobMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_letter_doc_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionState {
    pub fn from_parameters(parameters: &Map<String, Value>) -> ServiceResult<Self> {
        serde_json::from_value(Value::Object(parameters.clone()))
            .map_err(|e| ServiceError::invalid(format!("Invalid session parameters: {}", e)))
    }

    pub fn into_parameters(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn folder(&self) -> ServiceResult<&str> {
        self.folder_id
            .as_deref()
            .ok_or_else(|| ServiceError::invalid("No folder yet; run create_folder first"))
    }
}

/// Fulfillment tags understood by [`dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Welcome,
    CreateFolder,
    UploadResume,
    MatchJobs,
    ExportMatches,
    CoverLetter,
    Unknown(String),
}

impl Tag {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).unwrap_or("") {
            "" | "welcome" => Self::Welcome,
            "create_folder" => Self::CreateFolder,
            "upload_resume" => Self::UploadResume,
            "match_jobs" => Self::MatchJobs,
            "export_matches" => Self::ExportMatches,
            "cover_letter" => Self::CoverLetter,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Handles one webhook call.
pub fn dispatch(services: &mut Services, request: &WebhookRequest) -> ServiceResult<WebhookResponse> {
    let tag = Tag::parse(request.fulfillment_info.tag.as_deref());
    let mut state = SessionState::from_parameters(&request.session_info.parameters)?;
    let utterance = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    debug!("webhook tag {:?}", tag);

    let reply = match &tag {
        Tag::Welcome => welcome(&state),
        Tag::CreateFolder => create_folder(services, &mut state)?,
        Tag::UploadResume => upload_resume(services, &mut state, utterance)?,
        Tag::MatchJobs => match_jobs(services, &mut state)?,
        Tag::ExportMatches => export_matches(services, &mut state)?,
        Tag::CoverLetter => cover_letter(services, &mut state)?,
        Tag::Unknown(name) => {
            info!("unhandled webhook tag '{}'", name);
            "Sorry, I can't help with that yet.".to_string()
        }
    };

    Ok(WebhookResponse {
        fulfillment_response: FulfillmentResponse {
            messages: vec![ResponseMessage {
                text: MessageText { text: vec![reply] },
            }],
        },
        session_info: SessionInfo {
            session: request.session_info.session.clone(),
            parameters: state.into_parameters(),
        },
    })
}

fn welcome(state: &SessionState) -> String {
    let name = state
        .user_name
        .as_deref()
        .map(|n| format!(" {}", n))
        .unwrap_or_default();
    format!(
        "Hi{}! I can keep your resume, find matching jobs and draft cover letters.",
        name
    )
}

fn create_folder(services: &mut Services, state: &mut SessionState) -> ServiceResult<String> {
    let name = state
        .user_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_FOLDER_NAME)
        .to_string();
    let folder = services
        .drive
        .create_folder(&name)
        .map_err(ServiceError::unavailable)?;
    state.folder_id = Some(folder.id);
    Ok(format!("Your folder \"{}\" is ready.", folder.name))
}

fn upload_resume(
    services: &mut Services,
    state: &mut SessionState,
    utterance: Option<&str>,
) -> ServiceResult<String> {
    let folder_id = state.folder()?.to_string();
    let text = state
        .resume_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(utterance)
        .ok_or_else(|| ServiceError::invalid("Resume text is empty"))?
        .to_string();

    let doc = services
        .drive
        .put_document(&folder_id, RESUME_TITLE, "text/plain", &text)
        .map_err(ServiceError::unavailable)?;
    state.resume_doc_id = Some(doc.id);
    state.resume_text = Some(text);
    Ok("Saved your resume.".to_string())
}

fn resume_text(services: &Services, state: &SessionState) -> ServiceResult<String> {
    if let Some(text) = state
        .resume_text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        return Ok(text.to_string());
    }
    let doc_id = state
        .resume_doc_id
        .as_deref()
        .ok_or_else(|| ServiceError::invalid("No resume on file; run upload_resume first"))?;
    services
        .drive
        .get_document(doc_id)
        .map_err(ServiceError::unavailable)?
        .map(|doc| doc.body)
        .ok_or_else(|| ServiceError::not_found(format!("Resume document {} not found", doc_id)))
}

fn match_jobs(services: &mut Services, state: &mut SessionState) -> ServiceResult<String> {
    let resume = resume_text(services, state)?;
    if services.index.count().map_err(ServiceError::unavailable)? == 0 {
        return Err(ServiceError::not_found("No jobs indexed yet"));
    }
    let vector = embed_text(services, &resume)
        .map_err(ServiceError::unavailable)?
        .ok_or_else(|| ServiceError::invalid("Resume text is empty"))?;
    let top_k = services.settings.top_k;
    let neighbors = services
        .index
        .query(&vector, top_k)
        .map_err(ServiceError::unavailable)?;

    let field = |metadata: &Value, key: &str| {
        metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    state.matches = neighbors
        .into_iter()
        .map(|n| JobMatch {
            title: field(&n.metadata, "title"),
            company: field(&n.metadata, "company"),
            job_id: n.id,
            score: n.score,
        })
        .collect();
    state.selected_job_id = None;

    let mut reply = format!("Here are your top {} matches:", state.matches.len());
    for (rank, m) in state.matches.iter().enumerate() {
        reply.push_str(&format!("\n{}. {} ({:.2})", rank + 1, m.label(), m.score));
    }
    Ok(reply)
}

/// Escapes a value for a markdown table cell.
///
/// Pipes are backslash-escaped and line breaks collapse to single spaces.
fn table_cell(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

/// Renders matches as a markdown table.
pub fn render_matches(matches: &[JobMatch]) -> String {
    let mut out = String::from("# Job matches\n\n| Rank | Job | Company | Score |\n|---|---|---|---|\n");
    for (rank, m) in matches.iter().enumerate() {
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} |\n",
            rank + 1,
            table_cell(m.title.as_deref().unwrap_or(&m.job_id)),
            table_cell(m.company.as_deref().unwrap_or("")),
            m.score
        ));
    }
    out
}

fn export_matches(services: &mut Services, state: &mut SessionState) -> ServiceResult<String> {
    let folder_id = state.folder()?.to_string();
    if state.matches.is_empty() {
        return Err(ServiceError::invalid("No matches yet; run match_jobs first"));
    }
    let doc = services
        .drive
        .put_document(
            &folder_id,
            MATCHES_TITLE,
            "text/markdown",
            &render_matches(&state.matches),
        )
        .map_err(ServiceError::unavailable)?;
    state.export_doc_id = Some(doc.id);
    Ok(format!("Saved {} matches to \"{}\".", state.matches.len(), MATCHES_TITLE))
}

fn cover_letter(services: &mut Services, state: &mut SessionState) -> ServiceResult<String> {
    let folder_id = state.folder()?.to_string();
    let resume = resume_text(services, state)?;
    let job_id = state
        .selected_job_id
        .clone()
        .or_else(|| state.matches.first().map(|m| m.job_id.clone()))
        .ok_or_else(|| ServiceError::invalid("No job selected; run match_jobs first"))?;

    let source = services.settings.source_table.clone();
    let posting = services
        .warehouse
        .get_posting(&source, &job_id)
        .map_err(ServiceError::unavailable)?
        .ok_or_else(|| ServiceError::not_found(format!("Job {} not found", job_id)))?;

    let request = GenerationRequest {
        system: COVER_LETTER_SYSTEM.to_string(),
        prompt: cover_letter_prompt(
            state.user_name.as_deref(),
            &resume,
            posting.display_title(),
            posting.company.as_deref(),
            &posting.description,
        ),
        max_tokens: services.settings.max_tokens,
        temperature: services.settings.temperature,
    };
    let letter = services
        .generator
        .generate(&request)
        .map_err(ServiceError::unavailable)?;

    let title = format!("Cover letter - {}", posting.display_title());
    let doc = services
        .drive
        .put_document(&folder_id, &title, "text/plain", &letter)
        .map_err(ServiceError::unavailable)?;
    state.cover_letter_doc_id = Some(doc.id);
    state.selected_job_id = Some(job_id);
    Ok(letter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{run_trans, TransRequest};
    use crate::services::testing::{load_postings, temp_services};
    use serde_json::json;

    fn call(services: &mut Services, tag: &str, params: &Map<String, Value>) -> ServiceResult<WebhookResponse> {
        let request = WebhookRequest {
            fulfillment_info: FulfillmentInfo {
                tag: Some(tag.to_string()),
            },
            session_info: SessionInfo {
                session: Some("projects/p/sessions/s1".to_string()),
                parameters: params.clone(),
            },
            text: None,
        };
        dispatch(services, &request)
    }

    fn indexed_services() -> (tempfile::TempDir, Services) {
        let (dir, mut services) = temp_services();
        services.settings.chunk_size = 40;
        load_postings(&mut services);
        run_trans(
            &mut services,
            &TransRequest {
                mode: Some("all".to_string()),
            },
            false,
        )
        .unwrap();
        (dir, services)
    }

    #[test]
    fn test_envelope_parsing() {
        let request: WebhookRequest = serde_json::from_value(json!({
            "fulfillmentInfo": {"tag": "welcome"},
            "sessionInfo": {"session": "s", "parameters": {"user_name": "Ada", "lang": "en"}},
            "text": "hello"
        }))
        .unwrap();
        assert_eq!(request.fulfillment_info.tag.as_deref(), Some("welcome"));
        let state = SessionState::from_parameters(&request.session_info.parameters).unwrap();
        assert_eq!(state.user_name.as_deref(), Some("Ada"));
        assert_eq!(state.extra["lang"], "en");
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!(Tag::parse(None), Tag::Welcome);
        assert_eq!(Tag::parse(Some("match_jobs")), Tag::MatchJobs);
        assert_eq!(Tag::parse(Some("dance")), Tag::Unknown("dance".to_string()));
    }

    #[test]
    fn test_unknown_tag_is_not_an_error() {
        let (_dir, mut services) = temp_services();
        let mut params = Map::new();
        params.insert("lang".to_string(), json!("en"));
        let response = call(&mut services, "dance", &params).unwrap();
        assert_eq!(response.first_text(), Some("Sorry, I can't help with that yet."));
        assert_eq!(response.session_info.parameters["lang"], "en");
        assert_eq!(
            response.session_info.session.as_deref(),
            Some("projects/p/sessions/s1")
        );
    }

    #[test]
    fn test_prerequisites_are_invalid_requests() {
        let (_dir, mut services) = temp_services();
        let err = call(&mut services, "upload_resume", &Map::new()).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let mut params = Map::new();
        params.insert("folder_id".to_string(), json!("abc"));
        let err = call(&mut services, "upload_resume", &params).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = call(&mut services, "match_jobs", &Map::new()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_match_on_empty_index_is_not_found() {
        let (_dir, mut services) = temp_services();
        let mut params = Map::new();
        params.insert("resume_text".to_string(), json!("Rust and SQL."));
        let err = call(&mut services, "match_jobs", &params).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_full_conversation() {
        let (_dir, mut services) = indexed_services();

        let mut params = Map::new();
        params.insert("user_name".to_string(), json!("Ada"));
        let response = call(&mut services, "create_folder", &params).unwrap();
        let folder_id = response.session_info.parameters["folder_id"].clone();
        assert!(folder_id.is_string());

        // folder creation is idempotent
        let again = call(&mut services, "create_folder", &response.session_info.parameters).unwrap();
        assert_eq!(again.session_info.parameters["folder_id"], folder_id);

        let mut params = again.session_info.parameters.clone();
        params.insert(
            "resume_text".to_string(),
            json!("I analyze SQL data and build dashboards for teams."),
        );
        let response = call(&mut services, "upload_resume", &params).unwrap();
        assert_eq!(response.first_text(), Some("Saved your resume."));
        assert!(response.session_info.parameters["resume_doc_id"].is_string());

        let response = call(&mut services, "match_jobs", &response.session_info.parameters).unwrap();
        let state = SessionState::from_parameters(&response.session_info.parameters).unwrap();
        assert_eq!(state.matches.len(), 3);
        assert_eq!(state.matches[0].job_id, "j3");
        assert!(response.first_text().unwrap().contains("1. Data Analyst at Numbers Inc"));

        let response =
            call(&mut services, "export_matches", &response.session_info.parameters).unwrap();
        let state = SessionState::from_parameters(&response.session_info.parameters).unwrap();
        let export = services
            .drive
            .get_document(state.export_doc_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert!(export.body.contains("| 1 | Data Analyst | Numbers Inc |"));

        let response = call(&mut services, "cover_letter", &response.session_info.parameters).unwrap();
        let letter = response.first_text().unwrap();
        assert!(letter.starts_with("Dear Numbers Inc Hiring Team,"));
        assert!(letter.contains("Data Analyst position"));
        let state = SessionState::from_parameters(&response.session_info.parameters).unwrap();
        let doc = services
            .drive
            .get_document(state.cover_letter_doc_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(doc.meta.title, "Cover letter - Data Analyst");
        assert_eq!(state.selected_job_id.as_deref(), Some("j3"));
    }

    #[test]
    fn test_render_matches_escapes_cells() {
        let matches = vec![JobMatch {
            job_id: "j1".to_string(),
            title: Some("C|C++ Dev".to_string()),
            company: Some("Acme\r\nLabs".to_string()),
            score: 0.5,
        }];
        let table = render_matches(&matches);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "| 1 | C\\|C++ Dev | Acme Labs | 0.500 |");
    }

    #[test]
    fn test_cover_letter_for_missing_posting() {
        let (_dir, mut services) = indexed_services();
        let folder = services.drive.create_folder("ada").unwrap();
        let mut params = Map::new();
        params.insert("folder_id".to_string(), json!(folder.id));
        params.insert("resume_text".to_string(), json!("Rust."));
        params.insert("selected_job_id".to_string(), json!("j404"));
        let err = call(&mut services, "cover_letter", &params).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
