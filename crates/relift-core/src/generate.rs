//! Per-application generators and their strict response parsers.
//!
//! Transport failures are the resilient client's problem; this layer deals
//! only in content shape. A response that does not match the documented
//! contract is a [`ReliftError::Parse`], never retried here.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ResilientClient;
use crate::corpus::ReferenceCorpus;
use crate::error::{ReliftError, Result};
use crate::prompts;
use crate::target::TargetSpec;

/// Which response contract the infrastructure generator asks for.
///
/// `Structured` is the default: a single JSON object with labeled fields,
/// parsed strictly. `Delimited` keeps the legacy `(main|||variables)` tuple
/// for services that cannot be trusted with JSON escaping; swapping formats
/// never touches callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Structured,
    Delimited,
}

/// One generated document plus the prompt that produced it.
#[derive(Debug, Clone)]
pub struct Generated {
    pub content: String,
    pub prompt: String,
}

/// A generated infrastructure document pair plus its prompt.
#[derive(Debug, Clone)]
pub struct GeneratedInfra {
    pub main: String,
    pub variables: String,
    pub prompt: String,
}

/// Generate a Dockerfile: one round trip, response used verbatim (trimmed).
pub async fn generate_dockerfile(
    client: &ResilientClient,
    spec: &TargetSpec,
    cancel: &CancellationToken,
) -> Result<Generated> {
    let prompt = prompts::dockerfile_prompt(spec);
    let response = client.invoke(&prompt, cancel).await?;
    let content = response.trim();
    if content.is_empty() {
        return Err(ReliftError::Parse("empty Dockerfile response".into()));
    }
    debug!(app = %spec.app_name, bytes = content.len(), "dockerfile generated");
    Ok(Generated {
        content: content.to_owned(),
        prompt,
    })
}

/// Generate the infrastructure configuration pair: one round trip whose
/// response is parsed according to `format`.
pub async fn generate_infra(
    client: &ResilientClient,
    spec: &TargetSpec,
    corpus: &ReferenceCorpus,
    format: ResponseFormat,
    cancel: &CancellationToken,
) -> Result<GeneratedInfra> {
    let prompt = match format {
        ResponseFormat::Structured => prompts::infra_prompt_structured(spec, corpus),
        ResponseFormat::Delimited => prompts::infra_prompt_delimited(spec, corpus),
    };
    let response = client.invoke(&prompt, cancel).await?;
    let (main, variables) = parse_infra_response(format, &response)?;
    debug!(
        app = %spec.app_name,
        main_bytes = main.len(),
        variables_bytes = variables.len(),
        "infrastructure configuration generated"
    );
    Ok(GeneratedInfra {
        main,
        variables,
        prompt,
    })
}

/// Parse an infrastructure response into `(main, variables)`.
pub fn parse_infra_response(format: ResponseFormat, response: &str) -> Result<(String, String)> {
    match format {
        ResponseFormat::Structured => parse_structured(response),
        ResponseFormat::Delimited => parse_delimited(response),
    }
}

#[derive(Deserialize)]
struct InfraDocuments {
    main: String,
    variables: String,
}

/// Strict parse of the labeled-fields contract: the outermost JSON object
/// in the response must carry non-empty `main` and `variables` strings.
fn parse_structured(response: &str) -> Result<(String, String)> {
    let response = response.trim();
    let start = response
        .find('{')
        .ok_or_else(|| ReliftError::Parse("no JSON object in response".into()))?;
    let end = response
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ReliftError::Parse("unterminated JSON object in response".into()))?;

    let documents: InfraDocuments = serde_json::from_str(&response[start..=end])
        .map_err(|e| ReliftError::Parse(format!("response is not the documented schema: {e}")))?;

    let main = documents.main.trim().to_owned();
    if main.is_empty() {
        return Err(ReliftError::Parse("empty main document in response".into()));
    }
    Ok((main, documents.variables.trim().to_owned()))
}

/// Strict parse of the legacy tuple contract: content between the first
/// `(` and the last `)`, split once on `|||`, trimmed of whitespace and
/// stray quotes.
fn parse_delimited(response: &str) -> Result<(String, String)> {
    let response = response.trim();
    let start = response
        .find('(')
        .ok_or_else(|| ReliftError::Parse("no opening parenthesis in response".into()))?;
    let end = response
        .rfind(')')
        .filter(|end| *end > start)
        .ok_or_else(|| ReliftError::Parse("no matching closing parenthesis in response".into()))?;

    let content = &response[start + 1..end];
    let (main, variables) = content
        .split_once("|||")
        .ok_or_else(|| ReliftError::Parse("missing '|||' delimiter in response".into()))?;

    let main = main.trim().trim_matches('"').trim().to_owned();
    let variables = variables.trim().trim_matches('"').trim().to_owned();
    if main.is_empty() {
        return Err(ReliftError::Parse("empty main document in response".into()));
    }
    Ok((main, variables))
}

/// Parse a labeled-sections repair response into `(main, variables)`.
/// The contract is the one `prompts::init_repair_prompt` requests.
pub fn parse_repair_sections(response: &str) -> Result<(String, String)> {
    let (main_part, variables_part) = response
        .split_once(prompts::VARIABLES_SECTION_MARKER)
        .ok_or_else(|| {
            ReliftError::Parse(format!(
                "repair response missing {}",
                prompts::VARIABLES_SECTION_MARKER
            ))
        })?;

    let main = main_part
        .trim()
        .strip_prefix(prompts::MAIN_SECTION_MARKER)
        .unwrap_or(main_part)
        .trim()
        .to_owned();
    let variables = variables_part.trim().to_owned();
    if main.is_empty() {
        return Err(ReliftError::Parse("empty main document in repair response".into()));
    }
    Ok((main, variables))
}
