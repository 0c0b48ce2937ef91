//! # Definition Validation
//!
//! Structural checks performed once, when a definition first appears on
//! the DAG: complexity and op budgets, weight range enforcement, negation
//! restrictions and template expansion. Evaluation-time work is bounded by
//! what passes here, so a definition that validates can always be
//! evaluated within the op budget.

use crate::ast::Definition;
use crate::errors::DefinitionError;
use crate::state::StateReader;
use serde_json::Value;
use shared_types::{MAX_COMPLEXITY, MAX_OPS, MAX_SAFE_INTEGER};

/// Budget accounting of a validated definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefinitionInfo {
    /// Accumulated structural complexity.
    pub complexity: u32,
    /// Node count (upper bound on evaluation ops).
    pub ops: u32,
    /// Whether a `sig` operator occurs anywhere.
    pub has_sig: bool,
}

/// Validate with the protocol budgets.
pub fn validate_definition(def: &Definition) -> Result<DefinitionInfo, DefinitionError> {
    validate_definition_bounded(def, MAX_COMPLEXITY, MAX_OPS)
}

/// Validate with explicit budgets (configurable per deployment).
pub fn validate_definition_bounded(
    def: &Definition,
    max_complexity: u32,
    max_ops: u32,
) -> Result<DefinitionInfo, DefinitionError> {
    let mut info = DefinitionInfo {
        complexity: 0,
        ops: 0,
        has_sig: false,
    };
    walk(def, false, &mut info, max_complexity, max_ops)?;
    Ok(info)
}

fn walk(
    def: &Definition,
    in_negation: bool,
    info: &mut DefinitionInfo,
    max_complexity: u32,
    max_ops: u32,
) -> Result<(), DefinitionError> {
    info.ops += 1;
    if info.ops > max_ops {
        return Err(DefinitionError::OpsExceeded {
            ops: info.ops,
            max: max_ops,
        });
    }
    info.complexity += complexity_of(def);
    if info.complexity > max_complexity {
        return Err(DefinitionError::ComplexityExceeded {
            complexity: info.complexity,
            max: max_complexity,
        });
    }
    if in_negation && banned_in_negation(def) {
        return Err(DefinitionError::BannedInNegation(def.op_name()));
    }

    match def {
        Definition::Sig { .. } => {
            info.has_sig = true;
            Ok(())
        }
        Definition::Hash { .. }
        | Definition::Address(_)
        | Definition::CosignedBy(_)
        | Definition::InDataFeed { .. }
        | Definition::InMerkle { .. }
        | Definition::Has(_)
        | Definition::HasOneOf { .. }
        | Definition::Seen(_)
        | Definition::Attested { .. }
        | Definition::Age { .. }
        | Definition::Formula(_) => Ok(()),
        Definition::Template { .. } => Err(DefinitionError::Unresolved(
            "templates must be expanded before validation".into(),
        )),
        Definition::Not(inner) => walk(inner, true, info, max_complexity, max_ops),
        Definition::And(subs) | Definition::Or(subs) => {
            for sub in subs {
                walk(sub, in_negation, info, max_complexity, max_ops)?;
            }
            Ok(())
        }
        Definition::ROfSet { required, set } => {
            if *required == 0 || *required > set.len() {
                return Err(DefinitionError::Malformed(format!(
                    "r of set requires {} of {} members",
                    required,
                    set.len()
                )));
            }
            for sub in set {
                walk(sub, in_negation, info, max_complexity, max_ops)?;
            }
            Ok(())
        }
        Definition::WeightedAnd { required, set } => {
            if *required > MAX_SAFE_INTEGER {
                return Err(DefinitionError::UnsafeNumber(format!(
                    "required = {required}"
                )));
            }
            let mut total: u64 = 0;
            for (weight, sub) in set {
                if *weight > MAX_SAFE_INTEGER {
                    return Err(DefinitionError::UnsafeNumber(format!("weight = {weight}")));
                }
                total = total
                    .checked_add(*weight)
                    .filter(|t| *t <= MAX_SAFE_INTEGER)
                    .ok_or_else(|| {
                        DefinitionError::UnsafeNumber("weight sum overflows safe range".into())
                    })?;
                walk(sub, in_negation, info, max_complexity, max_ops)?;
            }
            if *required > total {
                return Err(DefinitionError::Malformed(format!(
                    "required weight {required} exceeds attainable total {total}"
                )));
            }
            Ok(())
        }
    }
}

fn complexity_of(def: &Definition) -> u32 {
    match def {
        // Combinators cost nothing by themselves.
        Definition::Not(_)
        | Definition::And(_)
        | Definition::Or(_)
        | Definition::ROfSet { .. }
        | Definition::WeightedAnd { .. } => 0,
        // A merkle check costs its worst-case proof verification.
        Definition::InMerkle { max_depth, .. } => 1 + *max_depth,
        _ => 1,
    }
}

fn banned_in_negation(def: &Definition) -> bool {
    matches!(
        def,
        Definition::Sig { .. }
            | Definition::Hash { .. }
            | Definition::Address(_)
            | Definition::CosignedBy(_)
            | Definition::InMerkle { .. }
    )
}

/// Replace every `definition template` node by its stored definition with
/// `$name` parameters substituted. Expansion is bounded to `max_rounds`
/// nested template levels.
pub fn expand_templates(
    def_value: &Value,
    reader: &dyn StateReader,
    max_mci: u64,
    max_rounds: u32,
) -> Result<Value, DefinitionError> {
    let mut current = def_value.clone();
    for _ in 0..=max_rounds {
        let (expanded, changed) = expand_once(&current, reader, max_mci)?;
        current = expanded;
        if !changed {
            return Ok(current);
        }
    }
    Err(DefinitionError::ComplexityExceeded {
        complexity: u32::MAX,
        max: max_rounds,
    })
}

fn expand_once(
    value: &Value,
    reader: &dyn StateReader,
    max_mci: u64,
) -> Result<(Value, bool), DefinitionError> {
    if let Some(arr) = value.as_array() {
        if arr.first().and_then(Value::as_str) == Some("definition template") {
            let args = arr.get(1).ok_or_else(|| {
                DefinitionError::Malformed("definition template needs args".into())
            })?;
            let hash = args
                .get("hash")
                .and_then(Value::as_str)
                .ok_or_else(|| DefinitionError::Malformed("template needs hash".into()))?;
            let params = args
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let template = reader
                .definition_at(hash, max_mci)?
                .ok_or_else(|| DefinitionError::Unresolved(format!("template {hash}")))?;
            return Ok((substitute(&template, &params), true));
        }
        let mut changed = false;
        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            let (expanded, c) = expand_once(item, reader, max_mci)?;
            changed |= c;
            out.push(expanded);
        }
        return Ok((Value::Array(out), changed));
    }
    if let Some(obj) = value.as_object() {
        let mut changed = false;
        let mut out = serde_json::Map::with_capacity(obj.len());
        for (key, item) in obj {
            let (expanded, c) = expand_once(item, reader, max_mci)?;
            changed |= c;
            out.insert(key.clone(), expanded);
        }
        return Ok((Value::Object(out), changed));
    }
    Ok((value.clone(), false))
}

fn substitute(value: &Value, params: &serde_json::Map<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                if let Some(replacement) = params.get(name) {
                    return replacement.clone();
                }
            }
            value.clone()
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| substitute(v, params)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), substitute(v, params)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Definition {
        Definition::parse(&v).unwrap()
    }

    #[test]
    fn counts_complexity_and_detects_sig() {
        let def = parse(json!([
            "and",
            [["sig", {"pubkey": "A"}], ["sig", {"pubkey": "B"}]]
        ]));
        let info = validate_definition(&def).unwrap();
        assert_eq!(info.complexity, 2);
        assert_eq!(info.ops, 3);
        assert!(info.has_sig);
    }

    #[test]
    fn complexity_budget_enforced() {
        let subs: Vec<Value> = (0..120)
            .map(|i| json!(["sig", {"pubkey": format!("PK{i}")}]))
            .collect();
        let def = parse(json!(["and", subs]));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::ComplexityExceeded { .. })
        ));
    }

    #[test]
    fn merkle_proof_depth_charges_complexity() {
        let def = parse(json!(["in merkle", [["ORACLE"], "roots", 200]]));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::ComplexityExceeded { .. })
        ));
        let shallow = parse(json!(["in merkle", [["ORACLE"], "roots", 16]]));
        let info = validate_definition(&shallow).unwrap();
        assert_eq!(info.complexity, 17);
    }

    #[test]
    fn sig_banned_under_not() {
        let def = parse(json!(["not", ["sig", {"pubkey": "A"}]]));
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::BannedInNegation("sig"))
        );
        // Stateful predicates are fine under negation.
        let ok = parse(json!(["not", ["in data feed", [["O"], "f", "=", 1]]]));
        assert!(validate_definition(&ok).is_ok());
    }

    #[test]
    fn weighted_and_rejects_unsafe_numbers() {
        let def = Definition::WeightedAnd {
            required: MAX_SAFE_INTEGER + 1,
            set: vec![(1, Definition::Formula("1 == 1".into()))],
        };
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::UnsafeNumber(_))
        ));

        let overflow = Definition::WeightedAnd {
            required: 1,
            set: vec![
                (MAX_SAFE_INTEGER, Definition::Formula("1 == 1".into())),
                (MAX_SAFE_INTEGER, Definition::Formula("1 == 1".into())),
            ],
        };
        assert!(matches!(
            validate_definition(&overflow),
            Err(DefinitionError::UnsafeNumber(_))
        ));
    }

    #[test]
    fn unattainable_weight_threshold_rejected() {
        let def = Definition::WeightedAnd {
            required: 10,
            set: vec![(3, Definition::Formula("1 == 1".into()))],
        };
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::Malformed(_))
        ));
    }

    #[test]
    fn r_of_set_bounds_checked() {
        let def = Definition::ROfSet {
            required: 3,
            set: vec![Definition::Formula("1 == 1".into())],
        };
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn substitute_replaces_dollar_params() {
        let mut params = serde_json::Map::new();
        params.insert("pk".into(), json!("REALKEY"));
        let out = substitute(&json!(["sig", {"pubkey": "$pk"}]), &params);
        assert_eq!(out, json!(["sig", {"pubkey": "REALKEY"}]));
    }
}
