//! # Definition Evaluation
//!
//! Checks a unit's authentifiers against a (validated, template-expanded)
//! definition. Evaluation is pure: chain state arrives through the
//! [`StateReader`], signature checks run over the caller-supplied digest
//! of the stripped unit, and the op budget bounds total work.
//!
//! A missing authentifier makes its branch false; a present but
//! structurally broken one (undecodable base64, wrong key length) is an
//! error - the difference keeps `or` branches usable while still rejecting
//! garbage.

use crate::ast::{Definition, HasFilter, HasWhat};
use crate::errors::DefinitionError;
use crate::state::{FormulaEvaluator, StateReader};
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use shared_types::{Input, MessageBody, Unit, MAX_OPS};
use std::collections::BTreeMap;

/// Everything the evaluator sees about the unit under validation.
pub struct EvalInput<'a> {
    /// The unit (for `has`/`sum`/`cosigned by` checks).
    pub unit: &'a Unit,
    /// SHA-256 digest of the canonical stripped unit; what `sig` verifies.
    pub digest: &'a [u8; 32],
    /// This author's authentifiers, keyed by signing path.
    pub authentifiers: &'a BTreeMap<String, String>,
    /// The evaluating address.
    pub address: &'a str,
    /// Last-ball MCI fixing the visible stable state.
    pub last_ball_mci: u64,
}

/// Result of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOutcome {
    /// Whether the definition authenticated.
    pub authenticated: bool,
    /// Whether a `sig` operator was reached.
    pub has_sig: bool,
    /// Ops consumed.
    pub ops_used: u32,
}

struct EvalCtx<'a> {
    input: &'a EvalInput<'a>,
    reader: &'a dyn StateReader,
    formula: &'a dyn FormulaEvaluator,
    ops: u32,
    max_ops: u32,
    has_sig: bool,
}

/// Evaluate `def` against `input` with the protocol op budget.
pub fn evaluate(
    def: &Definition,
    input: &EvalInput<'_>,
    reader: &dyn StateReader,
    formula: &dyn FormulaEvaluator,
) -> Result<EvalOutcome, DefinitionError> {
    evaluate_bounded(def, input, reader, formula, MAX_OPS)
}

/// Evaluate with an explicit op budget.
pub fn evaluate_bounded(
    def: &Definition,
    input: &EvalInput<'_>,
    reader: &dyn StateReader,
    formula: &dyn FormulaEvaluator,
    max_ops: u32,
) -> Result<EvalOutcome, DefinitionError> {
    let mut ctx = EvalCtx {
        input,
        reader,
        formula,
        ops: 0,
        max_ops,
        has_sig: false,
    };
    let authenticated = eval_node(def, "r", &mut ctx)?;
    Ok(EvalOutcome {
        authenticated,
        has_sig: ctx.has_sig,
        ops_used: ctx.ops,
    })
}

fn eval_node(def: &Definition, path: &str, ctx: &mut EvalCtx<'_>) -> Result<bool, DefinitionError> {
    ctx.ops += 1;
    if ctx.ops > ctx.max_ops {
        return Err(DefinitionError::OpsExceeded {
            ops: ctx.ops,
            max: ctx.max_ops,
        });
    }
    match def {
        Definition::Sig { pubkey } => {
            ctx.has_sig = true;
            let Some(authentifier) = ctx.input.authentifiers.get(path) else {
                return Ok(false);
            };
            verify_sig(pubkey, authentifier, ctx.input.digest, path)
        }
        Definition::Hash { hash } => {
            let Some(authentifier) = ctx.input.authentifiers.get(path) else {
                return Ok(false);
            };
            let got = base64::engine::general_purpose::STANDARD
                .encode(Sha256::digest(authentifier.as_bytes()));
            Ok(&got == hash)
        }
        Definition::Address(address) => {
            let value = ctx
                .reader
                .definition_at(address, ctx.input.last_ball_mci)?
                .ok_or_else(|| DefinitionError::Unresolved(format!("address {address}")))?;
            let delegated = Definition::parse(&value)?;
            eval_node(&delegated, path, ctx)
        }
        Definition::CosignedBy(address) => Ok(ctx.input.unit.is_authored_by(address)),
        Definition::Not(inner) => Ok(!eval_node(inner, path, ctx)?),
        Definition::And(subs) => {
            for (i, sub) in subs.iter().enumerate() {
                if !eval_node(sub, &format!("{path}.{i}"), ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Definition::Or(subs) => {
            let mut any = false;
            for (i, sub) in subs.iter().enumerate() {
                // Every branch is evaluated so op accounting does not
                // depend on authentifier contents.
                if eval_node(sub, &format!("{path}.{i}"), ctx)? {
                    any = true;
                }
            }
            Ok(any)
        }
        Definition::ROfSet { required, set } => {
            let mut satisfied = 0usize;
            for (i, sub) in set.iter().enumerate() {
                if eval_node(sub, &format!("{path}.{i}"), ctx)? {
                    satisfied += 1;
                }
            }
            Ok(satisfied >= *required)
        }
        Definition::WeightedAnd { required, set } => {
            let mut total: u64 = 0;
            for (i, (weight, sub)) in set.iter().enumerate() {
                if eval_node(sub, &format!("{path}.{i}"), ctx)? {
                    total = total.saturating_add(*weight);
                }
            }
            Ok(total >= *required)
        }
        Definition::InDataFeed {
            oracles,
            feed,
            rel_op,
            value,
        } => ctx
            .reader
            .data_feed_exists(oracles, feed, rel_op, value, ctx.input.last_ball_mci),
        Definition::InMerkle {
            oracles,
            feed,
            max_depth,
        } => {
            let Some(authentifier) = ctx.input.authentifiers.get(path) else {
                return Ok(false);
            };
            let root = merkle_root_of_proof(authentifier, *max_depth, path)?;
            ctx.reader.data_feed_exists(
                oracles,
                feed,
                "=",
                &shared_types::FeedValue::String(root),
                ctx.input.last_ball_mci,
            )
        }
        Definition::Has(filter) => Ok(unit_matches(ctx.input.unit, filter)),
        Definition::HasOneOf { what, addresses } => Ok(addresses.iter().any(|addr| {
            let filter = HasFilter {
                what: *what,
                asset: None,
                address: Some(addr.clone()),
                amount: None,
                amount_at_least: None,
                amount_at_most: None,
            };
            unit_matches(ctx.input.unit, &filter)
        })),
        Definition::Seen(filter) => ctx
            .reader
            .seen_unit_matching(filter, ctx.input.last_ball_mci),
        Definition::Sum {
            filter,
            rel_op,
            value,
        } => {
            let total = sum_matching(ctx.input.unit, filter);
            Ok(compare_u64(total, rel_op, *value))
        }
        Definition::Attested { address, attestors } => {
            ctx.reader
                .is_attested(address, attestors, ctx.input.last_ball_mci)
        }
        Definition::Age { rel_op, value } => {
            match ctx
                .reader
                .address_age_mcis(ctx.input.address, ctx.input.last_ball_mci)?
            {
                Some(age) => Ok(compare_u64(age, rel_op, *value)),
                None => Ok(false),
            }
        }
        Definition::Formula(formula) => ctx
            .formula
            .evaluate_formula(formula, ctx.input.last_ball_mci),
        Definition::Template { hash, .. } => Err(DefinitionError::Unresolved(format!(
            "unexpanded template {hash}"
        ))),
    }
}

fn verify_sig(
    pubkey: &str,
    authentifier: &str,
    digest: &[u8; 32],
    path: &str,
) -> Result<bool, DefinitionError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let pk_bytes: [u8; 32] = engine
        .decode(pubkey)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DefinitionError::BadAuthentifier {
            path: path.to_string(),
            detail: "pubkey is not 32 base64 bytes".into(),
        })?;
    let sig_bytes: [u8; 64] = engine
        .decode(authentifier)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DefinitionError::BadAuthentifier {
            path: path.to_string(),
            detail: "signature is not 64 base64 bytes".into(),
        })?;
    let key = VerifyingKey::from_bytes(&pk_bytes).map_err(|e| DefinitionError::BadAuthentifier {
        path: path.to_string(),
        detail: e.to_string(),
    })?;
    let signature = Signature::from_bytes(&sig_bytes);
    Ok(key.verify(digest, &signature).is_ok())
}

/// A merkle proof authentifier is `element\nsibling...`; the root is the
/// fold of sorted-pair hashes. Proof length is capped by the definition.
fn merkle_root_of_proof(
    authentifier: &str,
    max_depth: u32,
    path: &str,
) -> Result<String, DefinitionError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut parts = authentifier.split('\n');
    let element = parts.next().unwrap_or_default();
    let siblings: Vec<&str> = parts.collect();
    if siblings.len() > max_depth as usize {
        return Err(DefinitionError::BadAuthentifier {
            path: path.to_string(),
            detail: format!("proof depth {} exceeds cap {max_depth}", siblings.len()),
        });
    }
    let mut current = engine.encode(Sha256::digest(element.as_bytes()));
    for sibling in siblings {
        let (a, b) = if current.as_str() <= sibling {
            (current.as_str(), sibling)
        } else {
            (sibling, current.as_str())
        };
        let mut hasher = Sha256::new();
        hasher.update(a.as_bytes());
        hasher.update(b.as_bytes());
        current = engine.encode(hasher.finalize());
    }
    Ok(current)
}

fn unit_matches(unit: &Unit, filter: &HasFilter) -> bool {
    for message in &unit.messages {
        let MessageBody::Payment(payment) = &message.body else {
            continue;
        };
        if filter.asset.as_deref() != payment.asset.as_deref() {
            continue;
        }
        match filter.what {
            HasWhat::Output => {
                for output in &payment.outputs {
                    if filter
                        .address
                        .as_ref()
                        .is_some_and(|a| *a != output.address)
                    {
                        continue;
                    }
                    if amount_ok(output.amount, filter) {
                        return true;
                    }
                }
            }
            HasWhat::Input => {
                for input in &payment.inputs {
                    if let Input::Transfer { .. } = input {
                        // Transfer source amounts are not in the unit body;
                        // only address-free and amount-free filters match.
                        if filter.address.is_none()
                            && filter.amount.is_none()
                            && filter.amount_at_least.is_none()
                            && filter.amount_at_most.is_none()
                        {
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

fn sum_matching(unit: &Unit, filter: &HasFilter) -> u64 {
    let mut total: u64 = 0;
    for message in &unit.messages {
        let MessageBody::Payment(payment) = &message.body else {
            continue;
        };
        if filter.asset.as_deref() != payment.asset.as_deref() {
            continue;
        }
        if filter.what == HasWhat::Output {
            for output in &payment.outputs {
                if filter
                    .address
                    .as_ref()
                    .is_some_and(|a| *a != output.address)
                {
                    continue;
                }
                if amount_ok(output.amount, filter) {
                    total = total.saturating_add(output.amount);
                }
            }
        }
    }
    total
}

fn amount_ok(amount: u64, filter: &HasFilter) -> bool {
    if filter.amount.is_some_and(|a| a != amount) {
        return false;
    }
    if filter.amount_at_least.is_some_and(|a| amount < a) {
        return false;
    }
    if filter.amount_at_most.is_some_and(|a| amount > a) {
        return false;
    }
    true
}

fn compare_u64(lhs: u64, rel_op: &str, rhs: u64) -> bool {
    match rel_op {
        "=" => lhs == rhs,
        "!=" => lhs != rhs,
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        _ => false,
    }
}
