//! Model-assisted fallback detector.
//!
//! Only consulted when the rule engine finds nothing. Sends one JSON-mode
//! completion request, strips code fences from the reply, and validates it
//! against the violation schema. The whole payload is rejected on any bad
//! entry. Failures never reach the caller of `run`: they come back as
//! `FallbackOutcome::Degraded` and detection continues with no fallback
//! violations.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::detection::rules::repeated_pushing_severity;
use crate::detection::triggers::rsd_prompt_addition;
use crate::detection::types::{BoundaryViolation, Severity, Trigger, ViolationType};
use crate::error::FallbackError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, payload_preview};

const DEFAULT_EVIDENCE: &str = "AI-detected pattern";
const DEFAULT_GENTLE: &str =
    "I appreciate you reaching out, but I need to maintain my boundaries here.";
const DEFAULT_MODERATE: &str = "I need to be clear about my boundaries. This doesn't work for me.";
const DEFAULT_FIRM: &str = "This crosses my boundaries. I need you to respect my limits.";

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1000;

pub const SYSTEM_PROMPT: &str = r#"You are an expert at identifying boundary violations in messages. Your role is to help users recognize when someone is:

1. **Guilt-Tripping**: Using emotional manipulation ("only you can help", "I really need you")
2. **Overstepping**: Asking invasive personal questions or making inappropriate assumptions
3. **After-Hours Pressure**: Sending urgent requests outside business hours
4. **Repeated Pushing**: Following a pattern of boundary violations
5. **Scope Creep**: Adding requirements, expanding project scope without proper discussion
6. **Timeline Pressure**: Changing deadlines/schedules without negotiation, using external pressure ("stakeholders want it", "boss needs it sooner")

**PAY SPECIAL ATTENTION TO**:
- Polite-sounding requests that actually violate boundaries ("would it be possible to move the deadline up?")
- Using third-party pressure as leverage ("stakeholders are getting antsy", "the team is waiting")
- Schedule changes presented as questions but expecting yes
- Adding urgency without discussing trade-offs or what can be removed

CRITICAL: Respond ONLY with valid JSON, no markdown or extra text."#;

const DETECTION_PROMPT: &str = r#"**BOUNDARY VIOLATION DETECTION SYSTEM**

Analyze this message for boundary violations using these patterns:

1. **Guilt-Tripping**: Phrases like "only you can help", "I really need you", emotional manipulation
2. **Overstepping**: Invasive personal questions, unsolicited advice, inappropriate interest
3. **After-Hours Pressure**: Urgent requests sent after 6 PM or before 8 AM
4. **Repeated Pushing**: Pattern of boundary violations from same person (3+ violations in 30 days)
5. **Scope Creep**: Adding requirements, changing deliverables, expanding project without discussion
6. **Timeline Pressure**: Moving up deadlines, changing schedules, creating artificial urgency, using external pressure ("stakeholders", "boss needs it")

**IMPORTANT**: "Would it be possible to..." or "Quick question..." often mask demands. Look for schedule changes without negotiation, external pressure used as leverage, and compressed timelines with no discussion of trade-offs.

For each violation detected:
- Explain WHY it's a violation in user-friendly language
- Provide 3 response templates: gentle, moderate, firm
- Include supporting evidence quoted from the message

If there is no violation, return {"violations": []}.

Output format:
{
  "violations": [
    {
      "type": "guilt_tripping|overstepping|after_hours_pressure|repeated_pushing|scope_creep|timeline_pressure|other",
      "severity": "low|medium|high",
      "explanation": "Plain English explanation",
      "evidence": ["specific phrases or patterns"],
      "suggested_gentle": "Gentle boundary-setting response",
      "suggested_moderate": "Moderate boundary-setting response",
      "suggested_firm": "Firm boundary-setting response"
    }
  ]
}"#;

/// Everything the fallback prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct FallbackInput<'a> {
    pub message: &'a str,
    pub prior_violation_count: u32,
    /// Sender profile summary; empty when there is not enough history.
    pub sender_context: &'a str,
    pub triggers: &'a [Trigger],
}

/// Build the user prompt for one message.
pub fn build_user_prompt(input: &FallbackInput<'_>) -> String {
    let mut prompt = format!(
        "{DETECTION_PROMPT}\n\n**Message to Analyze**: \"{}\"\n\n",
        input.message
    );

    if input.prior_violation_count > 0 {
        prompt.push_str(&format!(
            "**Context**: This sender has {} previous boundary violations on record.\n\n",
            input.prior_violation_count
        ));
    }

    if !input.sender_context.is_empty() {
        prompt.push_str(input.sender_context);
        prompt.push_str("\n\n");
    }

    let rsd = rsd_prompt_addition(input.triggers);
    if !rsd.is_empty() {
        prompt.push_str(&rsd);
        prompt.push('\n');
    }

    prompt.push_str("Analyze for boundary violations and suggest appropriate response templates.");
    prompt
}

/// Strip a surrounding Markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Parse and validate a raw model reply.
pub fn parse_fallback_response(raw: &str) -> Result<Vec<BoundaryViolation>, FallbackError> {
    let cleaned = strip_code_fences(raw);

    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| FallbackError::MalformedJson {
            reason: e.to_string(),
            preview: payload_preview(cleaned),
        })?;

    let schema = |reason: String| FallbackError::Schema {
        reason,
        preview: payload_preview(cleaned),
    };

    let root = value
        .as_object()
        .ok_or_else(|| schema("top-level value must be an object".to_string()))?;

    let entries = match root.get("violations") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(schema("'violations' must be an array".to_string())),
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_entry(entry).map_err(|reason| schema(format!("violations[{i}]: {reason}")))
        })
        .collect()
}

fn parse_entry(entry: &Value) -> Result<BoundaryViolation, String> {
    let obj = entry.as_object().ok_or("entry must be an object")?;

    let type_str = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or("'type' must be a string")?;
    let violation_type: ViolationType = type_str.parse()?;

    let severity_str = obj
        .get("severity")
        .and_then(Value::as_str)
        .ok_or("'severity' must be a string")?;
    let severity: Severity = severity_str.parse()?;

    let explanation = obj
        .get("explanation")
        .and_then(Value::as_str)
        .ok_or("'explanation' must be a string")?
        .to_string();

    let mut evidence = match obj.get("evidence") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| "'evidence' items must be strings".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err("'evidence' must be an array".to_string()),
    };
    if evidence.is_empty() {
        evidence.push(DEFAULT_EVIDENCE.to_string());
    }

    Ok(BoundaryViolation {
        violation_type,
        severity,
        explanation,
        evidence,
        suggested_gentle: suggestion(obj, "suggested_gentle", "suggestedGentle", DEFAULT_GENTLE)?,
        suggested_moderate: suggestion(
            obj,
            "suggested_moderate",
            "suggestedModerate",
            DEFAULT_MODERATE,
        )?,
        suggested_firm: suggestion(obj, "suggested_firm", "suggestedFirm", DEFAULT_FIRM)?,
    })
}

/// Suggested response under either key spelling. Missing, null or empty
/// falls back to the default copy.
fn suggestion(
    obj: &Map<String, Value>,
    snake: &str,
    camel: &str,
    default: &str,
) -> Result<String, String> {
    for key in [snake, camel] {
        match obj.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => return Ok(s.clone()),
            Some(_) => return Err(format!("'{key}' must be a string")),
        }
    }
    Ok(default.to_string())
}

/// Hold model-reported `repeated_pushing` to the stored history: dropped
/// below two prior violations, otherwise given the count's severity.
pub fn reconcile_with_history(
    violations: Vec<BoundaryViolation>,
    prior_violation_count: u32,
) -> Vec<BoundaryViolation> {
    let pushing = repeated_pushing_severity(prior_violation_count);
    violations
        .into_iter()
        .filter_map(|mut violation| {
            if violation.violation_type != ViolationType::RepeatedPushing {
                return Some(violation);
            }
            let severity = pushing?;
            violation.severity = severity;
            Some(violation)
        })
        .collect()
}

/// What happened to the fallback step for one request.
#[derive(Debug)]
pub enum FallbackOutcome {
    /// The rule engine found something, so no model call was made.
    Skipped,
    Completed(Vec<BoundaryViolation>),
    /// The call or its validation failed; no fallback violations.
    Degraded(FallbackError),
}

impl FallbackOutcome {
    pub fn violations(&self) -> &[BoundaryViolation] {
        match self {
            Self::Completed(v) => v,
            Self::Skipped | Self::Degraded(_) => &[],
        }
    }

    pub fn into_violations(self) -> Vec<BoundaryViolation> {
        match self {
            Self::Completed(v) => v,
            Self::Skipped | Self::Degraded(_) => Vec::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Completed(_) => "completed",
            Self::Degraded(_) => "degraded",
        }
    }
}

/// Runs the single model call for the fallback step.
pub struct FallbackDetector {
    llm: Arc<dyn LlmProvider>,
}

impl FallbackDetector {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// One model call, no retries. Errors are returned to the caller.
    pub async fn detect(
        &self,
        input: &FallbackInput<'_>,
    ) -> Result<Vec<BoundaryViolation>, FallbackError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_user_prompt(input)),
        ])
        .with_temperature(TEMPERATURE)
        .with_max_tokens(MAX_TOKENS)
        .with_json_output();

        debug!(model = self.llm.model_name(), "Running fallback boundary detection");
        let response = self.llm.complete(request).await?;
        let parsed = parse_fallback_response(&response.content)?;
        let reported = parsed.len();
        let violations = reconcile_with_history(parsed, input.prior_violation_count);
        if violations.len() < reported {
            debug!(
                prior_violations = input.prior_violation_count,
                "Dropped model repeated_pushing without enough history"
            );
        }
        Ok(violations)
    }

    /// Like `detect`, but failures are logged and downgraded.
    pub async fn run(&self, input: &FallbackInput<'_>) -> FallbackOutcome {
        match self.detect(input).await {
            Ok(violations) => {
                info!(count = violations.len(), "Fallback detection complete");
                FallbackOutcome::Completed(violations)
            }
            Err(e) => {
                warn!(
                    kind = e.label(),
                    error = %e,
                    "Fallback detection failed, continuing without it"
                );
                FallbackOutcome::Degraded(e)
            }
        }
    }
}
