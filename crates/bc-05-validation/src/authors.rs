//! # Author & Signature Checks
//!
//! Each author's definition - inline on first use or a change, stored
//! otherwise - is template-expanded, budget-validated and evaluated
//! against the stripped-unit digest. Evaluation failures of the content
//! (budgets, malformed definitions, bad authentifiers) are semantic unit
//! errors; only store failures surface as internal.

use crate::state_reader::StoreStateReader;
use crate::{formula_evaluator, internal, ValidationOptions};
use bc_01_hashing::{address_from_definition, unit_digest};
use bc_02_object_store::Store;
use bc_04_definitions::{
    evaluate_bounded, expand_templates, validate_definition_bounded, Definition, DefinitionError,
    EvalInput, StateReader,
};
use serde_json::Value;
use shared_types::{Address, Unit, ValidationError};
use tracing::trace;

/// Maximum nested template expansion rounds.
const MAX_TEMPLATE_ROUNDS: u32 = 5;

/// Validate all authors. Returns inline definitions to persist:
/// (address, definition value, chash).
pub fn check_authors(
    store: &Store,
    unit: &Unit,
    last_ball_mci: u64,
    options: &ValidationOptions,
) -> Result<Vec<(Address, Value, Address)>, ValidationError> {
    // Voided units carry no authentifiers to re-check.
    if unit.content_hash.is_some() {
        return Ok(Vec::new());
    }
    let digest = unit_digest(unit)
        .map_err(|e| ValidationError::Joint(format!("cannot hash unit for signing: {e}")))?;
    let reader = StoreStateReader::new(store);
    let mut inline_definitions = Vec::new();

    for author in &unit.authors {
        let expected_chash = store
            .definition_chash_at(&author.address, last_ball_mci)
            .map_err(internal)?;

        let definition_value = match &author.definition {
            Some(inline) => {
                let inline_chash = address_from_definition(inline);
                if inline_chash != expected_chash {
                    return Err(ValidationError::Unit(format!(
                        "definition of {} hashes to {inline_chash}, expected {expected_chash}",
                        author.address
                    )));
                }
                inline_definitions.push((
                    author.address.clone(),
                    inline.clone(),
                    inline_chash,
                ));
                inline.clone()
            }
            None => match store.definition(&expected_chash).map_err(internal)? {
                Some(row) => serde_json::from_str(&row.definition_json)
                    .map_err(|e| ValidationError::Internal(e.to_string()))?,
                None => {
                    return Err(ValidationError::Unit(format!(
                        "definition {expected_chash} of author {} must be shown inline",
                        author.address
                    )))
                }
            },
        };

        let expanded = expand_templates(&definition_value, &reader, last_ball_mci, MAX_TEMPLATE_ROUNDS)
            .map_err(definition_err)?;
        let definition = Definition::parse(&expanded).map_err(definition_err)?;
        let info =
            validate_definition_bounded(&definition, options.max_complexity, options.max_ops)
                .map_err(definition_err)?;
        trace!(
            address = %author.address,
            complexity = info.complexity,
            ops = info.ops,
            "definition validated"
        );

        let input = EvalInput {
            unit,
            digest: &digest,
            authentifiers: &author.authentifiers,
            address: &author.address,
            last_ball_mci,
        };
        let outcome = evaluate_bounded(
            &definition,
            &input,
            &reader as &dyn StateReader,
            &formula_evaluator(),
            options.max_ops,
        )
        .map_err(definition_err)?;
        if !outcome.authenticated {
            return Err(ValidationError::Unit(format!(
                "authentifier verification failed for {}",
                author.address
            )));
        }
    }
    Ok(inline_definitions)
}

/// Map definition-language failures into the taxonomy: state reads that
/// broke are internal; everything else condemns the content.
fn definition_err(e: DefinitionError) -> ValidationError {
    match e {
        DefinitionError::State(detail) => ValidationError::Internal(detail),
        other => ValidationError::Unit(other.to_string()),
    }
}
