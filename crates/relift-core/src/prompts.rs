//! Prompt builders for the per-application generators and the repair loop.
//!
//! Prompts are plain functions over serializable inputs so the same inputs
//! always produce the same bytes — reproducibility of a run reduces to the
//! determinism of the generation service.

use crate::corpus::ReferenceCorpus;
use crate::target::TargetSpec;

/// Labels for the two-document repair response contract.
pub const MAIN_SECTION_MARKER: &str = "### MAIN.TF ###";
pub const VARIABLES_SECTION_MARKER: &str = "### VARIABLES.TF ###";

/// Prompt for generating a container build file from an app description.
pub fn dockerfile_prompt(spec: &TargetSpec) -> String {
    let config_json = serde_json::to_string_pretty(spec).unwrap_or_default();
    format!(
        "Generate a Dockerfile for the following application configuration:\n\
         {config_json}\n\n\
         Instructions:\n\
         - Infer the language, framework, and versions from the configuration.\n\
         - Optimize the image for performance and security.\n\
         - Return only the Dockerfile content, nothing else."
    )
}

/// Prompt for the structured infrastructure-configuration contract: the
/// response must be a single JSON object with `main` and `variables` keys.
pub fn infra_prompt_structured(spec: &TargetSpec, corpus: &ReferenceCorpus) -> String {
    let config_json = serde_json::to_string_pretty(spec).unwrap_or_default();
    let mut prompt = format!(
        "Produce the Terraform configuration that deploys the application \
         below to {destination}.\n\n\
         Output format: respond with exactly one JSON object and nothing \
         else, shaped as\n\
         {{\"main\": \"<contents of main.tf>\", \"variables\": \"<contents of variables.tf>\"}}\n\
         The response is machine-parsed; any prose outside the JSON object \
         is an error.\n\n\
         Application and its dependencies (databases, services, domains):\n\
         {config_json}\n\n",
        destination = spec.destination,
    );
    prompt.push_str(GENERATION_RULES);
    push_corpus(&mut prompt, corpus);
    prompt
}

/// Prompt for the legacy delimiter contract: the response is a parenthesized
/// tuple `(main|||variables)`.
pub fn infra_prompt_delimited(spec: &TargetSpec, corpus: &ReferenceCorpus) -> String {
    let config_json = serde_json::to_string_pretty(spec).unwrap_or_default();
    let mut prompt = format!(
        "Produce the Terraform configuration that deploys the application \
         below to {destination}.\n\n\
         Output format: a tuple of two strings separated by \"|||\", \
         wrapped in parentheses: (main_tf_content|||variables_tf_content). \
         No introduction and no closing remarks — the output is parsed \
         mechanically.\n\n\
         Application and its dependencies (databases, services, domains):\n\
         {config_json}\n\n",
        destination = spec.destination,
    );
    prompt.push_str(GENERATION_RULES);
    push_corpus(&mut prompt, corpus);
    prompt
}

const GENERATION_RULES: &str = "\
Generation rules:\n\
- Use Dockerfile build mode, never buildpacks.\n\
- Export secrets (keys whose names contain SECRET, KEY, TOKEN, URI, or \
  values that look sensitive) into variables.tf with no default value.\n\
- Reference databases shared between applications instead of duplicating \
  them.\n\
- Model distinct pipeline stages as separate environments.\n\
- Enable preview environments for services that use review apps.\n\
- Export cluster and environment ids as variables instead of declaring \
  those resources.\n\
- Comment the configuration for readers who are not Terraform experts.\n";

fn push_corpus(prompt: &mut String, corpus: &ReferenceCorpus) {
    if !corpus.provider_docs.is_empty() {
        prompt.push_str("\nProvider documentation:\n");
        prompt.push_str(&serde_json::to_string(&corpus.provider_docs).unwrap_or_default());
        prompt.push('\n');
    }
    if !corpus.examples.is_empty() {
        prompt.push_str("\nReference examples:\n");
        prompt.push_str(&serde_json::to_string(&corpus.examples).unwrap_or_default());
        prompt.push('\n');
    }
}

/// Follow-up prompt after the initialization-style check failed. Asks for
/// both documents back, labeled, because provider and module resolution
/// errors almost always live in the main document but may require matching
/// variable changes.
pub fn init_repair_prompt(main: &str, variables: &str, diagnostic: &str) -> String {
    format!(
        "The following Terraform configuration failed during initialization.\n\n\
         Main configuration (main.tf):\n{main}\n\n\
         Variables (variables.tf):\n{variables}\n\n\
         Initialization error:\n{diagnostic}\n\n\
         Fix the configuration. Look for missing or wrong provider blocks, \
         invalid backend configuration, module source problems, and version \
         constraints.\n\
         Return only the corrected code for both files, with the main.tf \
         content preceded by {MAIN_SECTION_MARKER} and the variables.tf \
         content preceded by {VARIABLES_SECTION_MARKER}."
    )
}

/// Follow-up prompt after the structural validation check failed. The
/// diagnostic points into the main document; only it is regenerated.
pub fn structural_repair_prompt(main: &str, diagnostic: &str) -> String {
    format!(
        "The following Terraform configuration has validation errors:\n\n\
         {main}\n\n\
         Validation error:\n{diagnostic}\n\n\
         Fix the configuration. Return only the corrected Terraform code, \
         without any explanation."
    )
}
