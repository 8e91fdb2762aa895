//! External reasoning collaborator used as an alternative patch source.
//!
//! The collaborator is slow and unreliable by nature. [`AdvisorPatcher`] runs
//! each request on a background thread and waits at most the configured
//! timeout; anything other than a usable, changed program turns into the
//! zero-confidence candidate.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::extract::extract_code_block;
use crate::core::patch::{HeuristicPatcher, Patcher, finish_candidate};
use crate::core::policy::CapabilityPolicy;
use crate::core::types::{ErrorDescriptor, PatchCandidate, PatchSource};
use crate::io::config::{AdvisorConfig, PatchMode, RepairConfig};
use crate::io::prompt::{PromptBuilder, RepairPromptInputs};

/// Confidence assigned to collaborator rewrites, which carry no signal of their own.
pub const ADVISOR_CONFIDENCE: f64 = 0.5;

/// Text-completion backend.
pub trait Advisor {
    fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Advisor speaking the Ollama `/api/generate` protocol.
#[derive(Debug, Clone)]
pub struct HttpAdvisor {
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl HttpAdvisor {
    pub fn new(cfg: &AdvisorConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            timeout: cfg.timeout(),
        }
    }
}

impl Advisor for HttpAdvisor {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, model = %self.model, prompt_len = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build http client")?;
        let response = client
            .post(&self.endpoint)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            bail!("advisor returned HTTP {status}");
        }
        let body: GenerateResponse = response.json().context("decode advisor response")?;
        debug!(reply_len = body.response.len(), "advisor replied");
        Ok(body.response)
    }
}

/// [`Patcher`] that delegates to an [`Advisor`].
pub struct AdvisorPatcher<A> {
    advisor: Arc<A>,
    timeout: Duration,
    prompts: PromptBuilder,
    policy: CapabilityPolicy,
}

impl<A: Advisor + Send + Sync + 'static> AdvisorPatcher<A> {
    pub fn new(advisor: A, cfg: &AdvisorConfig, policy: &CapabilityPolicy) -> Self {
        Self {
            advisor: Arc::new(advisor),
            timeout: cfg.timeout(),
            prompts: PromptBuilder::new(cfg.prompt_budget_bytes),
            policy: policy.clone(),
        }
    }

    fn ask(&self, prompt: String) -> Result<String> {
        let (tx, rx) = mpsc::channel();
        let advisor = Arc::clone(&self.advisor);
        thread::spawn(move || {
            // The receiver is gone only if the caller already timed out.
            let _ = tx.send(advisor.complete(&prompt));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                bail!("advisor did not answer within {:?}", self.timeout)
            }
            Err(RecvTimeoutError::Disconnected) => bail!("advisor worker exited without a reply"),
        }
    }
}

impl<A: Advisor + Send + Sync + 'static> Patcher for AdvisorPatcher<A> {
    #[instrument(skip_all, fields(kind = %error.kind, line = ?error.line_number))]
    fn propose(&self, code: &str, error: &ErrorDescriptor, diagnostics: &str) -> PatchCandidate {
        let prompt = match self.prompts.build(&RepairPromptInputs {
            code,
            error,
            diagnostics,
            policy: &self.policy,
        }) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not build advisor prompt");
                return PatchCandidate::no_fix(code, PatchSource::Advisor);
            }
        };
        let reply = match self.ask(prompt) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "advisor unavailable");
                return PatchCandidate::no_fix(code, PatchSource::Advisor);
            }
        };
        let Some(rewritten) = extract_code_block(&reply) else {
            warn!(reply_len = reply.len(), "advisor reply contained no program");
            return PatchCandidate::no_fix(code, PatchSource::Advisor);
        };
        let candidate = finish_candidate(
            code,
            rewritten,
            "Rewrite proposed by the reasoning collaborator.".to_string(),
            ADVISOR_CONFIDENCE,
            PatchSource::Advisor,
        );
        info!(no_fix = candidate.is_no_fix(), "advisor candidate ready");
        candidate
    }
}

/// Tries `primary` first and falls back to `secondary` when it finds nothing.
pub struct FallbackPatcher<P, Q> {
    primary: P,
    secondary: Q,
}

impl<P, Q> FallbackPatcher<P, Q> {
    pub fn new(primary: P, secondary: Q) -> Self {
        Self { primary, secondary }
    }
}

impl<P: Patcher, Q: Patcher> Patcher for FallbackPatcher<P, Q> {
    fn propose(&self, code: &str, error: &ErrorDescriptor, diagnostics: &str) -> PatchCandidate {
        let candidate = self.primary.propose(code, error, diagnostics);
        if !candidate.is_no_fix() {
            return candidate;
        }
        debug!("primary patcher found nothing, trying fallback");
        self.secondary.propose(code, error, diagnostics)
    }
}

/// Patcher selected by `patch.mode`.
pub fn patcher_for_config(cfg: &RepairConfig) -> Box<dyn Patcher + Send + Sync> {
    let advisor = || AdvisorPatcher::new(HttpAdvisor::new(&cfg.advisor), &cfg.advisor, &cfg.policy);
    match cfg.patch.mode {
        PatchMode::Heuristic => Box::new(HeuristicPatcher),
        PatchMode::Advisor => Box::new(advisor()),
        PatchMode::HeuristicThenAdvisor => Box::new(FallbackPatcher::new(HeuristicPatcher, advisor())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorCategory;
    use crate::test_support::ScriptedAdvisor;

    fn error() -> ErrorDescriptor {
        ErrorDescriptor {
            kind: "KeyError".to_string(),
            message: "'k'".to_string(),
            line_number: Some(2),
            source_location: Some("<sandbox>".to_string()),
            category: ErrorCategory::Runtime,
        }
    }

    fn config(timeout_secs: u64) -> AdvisorConfig {
        AdvisorConfig {
            timeout_secs,
            ..AdvisorConfig::default()
        }
    }

    const CODE: &str = "d = {}\nprint(d['k'])\n";

    #[test]
    fn fenced_reply_becomes_advisor_candidate() {
        let advisor = ScriptedAdvisor::replies(vec![
            "Sure!\n```python\nd = {'k': 1}\nprint(d['k'])\n```\n".to_string(),
        ]);
        let patcher = AdvisorPatcher::new(advisor, &config(5), &CapabilityPolicy::standard());
        let candidate = patcher.propose(CODE, &error(), "KeyError: 'k'");
        assert_eq!(candidate.rewritten_code, "d = {'k': 1}\nprint(d['k'])\n");
        assert_eq!(candidate.confidence, ADVISOR_CONFIDENCE);
        assert_eq!(candidate.source, PatchSource::Advisor);
        assert!(candidate.unified_diff.contains("+d = {'k': 1}"));
    }

    #[test]
    fn failing_advisor_degrades_to_no_fix() {
        let advisor = ScriptedAdvisor::failing("connection refused");
        let patcher = AdvisorPatcher::new(advisor, &config(5), &CapabilityPolicy::standard());
        let candidate = patcher.propose(CODE, &error(), "");
        assert!(candidate.is_no_fix());
        assert_eq!(candidate.rewritten_code, CODE);
        assert_eq!(candidate.source, PatchSource::Advisor);
    }

    #[test]
    fn slow_advisor_times_out_to_no_fix() {
        let advisor = ScriptedAdvisor::replies(vec!["print(1)\n".to_string()])
            .with_delay(Duration::from_secs(3));
        let patcher = AdvisorPatcher::new(advisor, &config(1), &CapabilityPolicy::standard());
        let started = std::time::Instant::now();
        let candidate = patcher.propose(CODE, &error(), "");
        assert!(candidate.is_no_fix());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn identical_or_prose_reply_is_no_fix() {
        let advisor = ScriptedAdvisor::replies(vec![
            format!("```python\n{CODE}```"),
            "Sorry, I cannot help with that.".to_string(),
        ]);
        let patcher = AdvisorPatcher::new(advisor, &config(5), &CapabilityPolicy::standard());
        assert!(patcher.propose(CODE, &error(), "").is_no_fix());
        assert!(patcher.propose(CODE, &error(), "").is_no_fix());
    }

    #[test]
    fn prompt_sent_to_advisor_includes_program_and_diagnostics() {
        let advisor = ScriptedAdvisor::replies(vec!["print(1)\n".to_string()]);
        let patcher = AdvisorPatcher::new(advisor, &config(5), &CapabilityPolicy::standard());
        patcher.propose(CODE, &error(), "Traceback\nKeyError: 'k'");
        let prompts = patcher.advisor.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("print(d['k'])"));
        assert!(prompts[0].contains("Traceback\nKeyError: 'k'"));
    }

    #[test]
    fn fallback_uses_secondary_only_when_primary_finds_nothing() {
        let advisor = ScriptedAdvisor::replies(vec!["d = {'k': 0}\nprint(d['k'])\n".to_string()]);
        let patcher = FallbackPatcher::new(
            HeuristicPatcher,
            AdvisorPatcher::new(advisor, &config(5), &CapabilityPolicy::standard()),
        );
        let candidate = patcher.propose(CODE, &error(), "");
        assert_eq!(candidate.source, PatchSource::Advisor);

        let name_error = ErrorDescriptor {
            kind: "NameError".to_string(),
            message: "name 'x' is not defined".to_string(),
            line_number: Some(1),
            ..error()
        };
        let candidate = patcher.propose("print(x)\n", &name_error, "");
        assert_eq!(candidate.source, PatchSource::Heuristic);
        assert_eq!(patcher.secondary.advisor.prompts().len(), 1);
    }

    #[test]
    fn config_selects_patcher_by_mode() {
        let mut cfg = RepairConfig::default();
        let heuristic = patcher_for_config(&cfg);
        let name_error = ErrorDescriptor {
            kind: "NameError".to_string(),
            message: "name 'x' is not defined".to_string(),
            line_number: Some(1),
            ..error()
        };
        assert_eq!(
            heuristic.propose("print(x)\n", &name_error, "").rewritten_code,
            "x = 0\nprint(x)\n"
        );

        // Nothing listens on port 9; the advisor path must degrade, not fail.
        cfg.patch.mode = PatchMode::Advisor;
        cfg.advisor.endpoint = "http://127.0.0.1:9/api/generate".to_string();
        cfg.advisor.timeout_secs = 2;
        let advisor = patcher_for_config(&cfg);
        assert!(advisor.propose("print(x)\n", &name_error, "").is_no_fix());
    }
}
