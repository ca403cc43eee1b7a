//! Bounded validate → request-fix → revalidate loop for generated
//! JavaScript. Used only on the non-streaming path; the streaming pipeline
//! persists raw output and never blocks on repair.

use tracing::{info, warn};

use crate::extract::extract_code_block;
use crate::jsvalidate::validate_js;
use crate::prompt::fix_prompt;
use crate::providers::ProviderHandle;
use crate::{ChatMessage, Result};

/// Maximum validate/fix cycles before giving up.
pub const MAX_REPAIR_ATTEMPTS: u32 = 3;

const CODE_FENCE_LANGS: &[&str] = &["js", "javascript"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The code (original or model-fixed) passed validation.
    Repaired(String),
    /// Budget exhausted; the validator's own best-effort fix was adopted.
    Degraded(String),
    /// Budget exhausted with nothing adoptable; errors surfaced to caller.
    Exhausted(Vec<String>),
}

/// Run the repair loop over `code`, asking the model for fixes between
/// validation passes. Provider failures on the fix exchange propagate as
/// errors; validation failures do not.
pub async fn repair_js(
    client: &ProviderHandle,
    model: &str,
    code: &str,
) -> Result<RepairOutcome> {
    let mut current = code.to_string();

    for attempt in 1..=MAX_REPAIR_ATTEMPTS {
        let result = validate_js(&current);
        if result.is_valid {
            if attempt > 1 {
                info!(attempt, "generated code repaired");
            }
            return Ok(RepairOutcome::Repaired(current));
        }

        if attempt == MAX_REPAIR_ATTEMPTS {
            return Ok(match result.fixed_code {
                Some(fixed) => {
                    warn!(
                        attempt,
                        errors = result.errors.len(),
                        "repair budget exhausted; adopting validator best-effort fix"
                    );
                    RepairOutcome::Degraded(fixed)
                }
                None => RepairOutcome::Exhausted(result.errors),
            });
        }

        info!(attempt, errors = result.errors.len(), "requesting model fix");
        let request = fix_prompt(&current, &result.errors, &result.suggestions);
        let reply = client
            .complete(&[ChatMessage::user(request)], model)
            .await?;
        current = extract_code_block(&reply, CODE_FENCE_LANGS)
            .unwrap_or_else(|| reply.trim().to_string());
    }

    // Loop always returns from within; attempts start at 1.
    Ok(RepairOutcome::Exhausted(vec![]))
}
