//! Gemini pass-through repair.
//!
//! Native callers already speak the upstream contents shape, but real traffic
//! is frequently malformed: functionCall parts without ids, functionResponse
//! parts that reference nothing, signatures floating on their own parts.
//! These repairs make the conversation acceptable upstream without changing
//! its meaning.

use uuid::Uuid;

use prism_types::unified::{UnifiedContent, UnifiedPart, UnifiedRole};

use crate::proxy::common::model_family::ModelFamily;

fn generated_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Assign missing functionCall ids and pair every functionResponse with a
/// preceding unmatched call: by id when the response already carries one,
/// else by name (first unmatched call), else any unmatched call, else a
/// freshly generated id.
pub fn process_function_call_ids(contents: &mut [UnifiedContent]) {
    // Unmatched calls in appearance order: (id, name).
    let mut unmatched: Vec<(String, String)> = Vec::new();

    for content in contents.iter_mut() {
        match content.role {
            UnifiedRole::Model => {
                for part in &mut content.parts {
                    if let Some(call) = &mut part.function_call {
                        if call.id.as_deref().map_or(true, str::is_empty) {
                            call.id = Some(generated_call_id());
                        }
                        let id = call.id.clone().unwrap_or_default();
                        unmatched.push((id, call.name.clone()));
                    }
                }
            },
            UnifiedRole::User => {
                for part in &mut content.parts {
                    let Some(response) = &mut part.function_response else { continue };

                    if let Some(id) = response.id.clone().filter(|i| !i.is_empty()) {
                        if let Some(pos) = unmatched.iter().position(|(uid, _)| *uid == id) {
                            unmatched.remove(pos);
                            continue;
                        }
                    }
                    if let Some(pos) =
                        unmatched.iter().position(|(_, name)| *name == response.name)
                    {
                        let (id, _) = unmatched.remove(pos);
                        response.id = Some(id);
                        continue;
                    }
                    if !unmatched.is_empty() {
                        let (id, _) = unmatched.remove(0);
                        tracing::debug!(
                            "[Gemini-Repair] functionResponse '{}' matched by position to call {}",
                            response.name,
                            id
                        );
                        response.id = Some(id);
                        continue;
                    }
                    response.id = Some(generated_call_id());
                }
            },
        }
    }
}

/// Repair malformed thought/signature pairings on model turns.
///
/// Rule (applied consistently, see DESIGN.md): a standalone signature part is
/// merged onto the preceding bare thought part, or seeds a placeholder
/// thought when the turn has none; remaining standalone signatures backfill
/// unsigned functionCall parts in appearance order and are then removed. The
/// default tool signature is only applied to unsigned functionCall parts of
/// turns that carried no standalone signature at all.
pub fn process_model_thoughts(contents: &mut [UnifiedContent], model: &str) {
    let family = ModelFamily::from_model_name(model);
    for content in contents.iter_mut() {
        if content.role == UnifiedRole::Model {
            repair_thought_parts(&mut content.parts, family);
        }
    }
}

fn repair_thought_parts(parts: &mut Vec<UnifiedPart>, family: ModelFamily) {
    let had_standalone = parts.iter().any(UnifiedPart::is_standalone_signature);

    // Pass 1: the adjacent bare thought wins the first merge.
    let mut i = 0;
    while i < parts.len() {
        if parts[i].is_standalone_signature() {
            if i > 0 && parts[i - 1].is_thought() && parts[i - 1].thought_signature.is_none() {
                let signature = parts.remove(i).thought_signature.unwrap_or_default();
                parts[i - 1].thought_signature = Some(signature);
                continue;
            }
            if !parts.iter().any(UnifiedPart::is_thought) {
                let signature = parts[i].thought_signature.clone().unwrap_or_default();
                parts[i] = UnifiedPart::thought(" ", signature);
            }
        }
        i += 1;
    }

    // Pass 2: remaining standalone signatures backfill unsigned function
    // calls in appearance order, then are dropped.
    let mut spare_signatures: Vec<String> = Vec::new();
    parts.retain(|part| {
        if part.is_standalone_signature() {
            spare_signatures.push(part.thought_signature.clone().unwrap_or_default());
            false
        } else {
            true
        }
    });
    let mut spare_iter = spare_signatures.into_iter();

    for part in parts.iter_mut() {
        if part.function_call.is_some() && part.thought_signature.is_none() {
            if let Some(signature) = spare_iter.next() {
                part.thought_signature = Some(signature);
            } else if !had_standalone {
                part.thought_signature = Some(family.fallback_tool_signature().to_string());
            }
        }
    }
}
