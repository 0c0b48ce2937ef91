//! # Definition AST
//!
//! The wire form is `[op, args]`; the parser maps it onto a sealed sum
//! type so every later pass dispatches on variants. Complexity and op
//! counters travel alongside in the validation/evaluation contexts, not in
//! the tree.

use crate::errors::DefinitionError;
use serde_json::Value;
use shared_types::{Address, FeedValue};

/// One parsed definition node.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// Ed25519 signature by `pubkey` at this node's signing path.
    Sig {
        /// Base64 public key (32 bytes).
        pubkey: String,
    },
    /// The authentifier at this path must hash (SHA-256, base64) to `hash`.
    Hash {
        /// Expected base64 hash.
        hash: String,
    },
    /// Delegate to the current definition of another address.
    Address(Address),
    /// A separate author of the unit must be `address`.
    CosignedBy(Address),
    /// Negation. Provable-presence operators are banned inside.
    Not(Box<Definition>),
    /// All sub-definitions authenticate.
    And(Vec<Definition>),
    /// At least one sub-definition authenticates.
    Or(Vec<Definition>),
    /// At least `required` of `set` authenticate.
    ROfSet {
        /// Minimum satisfied count.
        required: usize,
        /// Candidate sub-definitions.
        set: Vec<Definition>,
    },
    /// Weighted threshold.
    WeightedAnd {
        /// Minimum weight sum.
        required: u64,
        /// (weight, sub-definition) pairs.
        set: Vec<(u64, Definition)>,
    },
    /// A matching data feed value exists at or before the last-ball MCI.
    InDataFeed {
        /// Accepted oracle addresses.
        oracles: Vec<Address>,
        /// Feed name.
        feed: String,
        /// Relational operator: `=`, `!=`, `>`, `>=`, `<`, `<=`.
        rel_op: String,
        /// Comparison value.
        value: FeedValue,
    },
    /// The path authentifier is a merkle element+proof whose root was
    /// posted as a data feed by one of the oracles.
    InMerkle {
        /// Accepted oracle addresses.
        oracles: Vec<Address>,
        /// Feed carrying the merkle root.
        feed: String,
        /// Maximum accepted proof depth; budgets the verification cost at
        /// definition time.
        max_depth: u32,
    },
    /// A matching input or output exists in the unit being evaluated.
    Has(HasFilter),
    /// An input/output whose address is one of `addresses` exists.
    HasOneOf {
        /// Side filtered.
        what: HasWhat,
        /// Accepted addresses.
        addresses: Vec<Address>,
    },
    /// A unit matching the filter was seen on the stable DAG.
    Seen(SeenFilter),
    /// Sum of matching outputs/inputs in this unit compared to `value`.
    Sum {
        /// Filter selecting the summed entries.
        filter: HasFilter,
        /// Relational operator.
        rel_op: String,
        /// Comparison value.
        value: u64,
    },
    /// The evaluating address holds an attestation by one of `attestors`.
    Attested {
        /// Attested address (usually the evaluating address).
        address: Address,
        /// Accepted attestors.
        attestors: Vec<Address>,
    },
    /// Age of the evaluating address, in MCIs, compared to `value`.
    Age {
        /// Relational operator.
        rel_op: String,
        /// Compared age.
        value: u64,
    },
    /// Deterministic formula, delegated to the formula evaluator.
    Formula(String),
    /// Instantiation of a stored template with parameter substitution.
    Template {
        /// Address (chash) of the stored template definition.
        hash: Address,
        /// Parameter map substituted into `$name` string slots.
        params: serde_json::Map<String, Value>,
    },
}

/// Which message side a [`HasFilter`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasWhat {
    /// Payment inputs.
    Input,
    /// Payment outputs.
    Output,
}

/// Filter over the inputs/outputs of the unit under evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct HasFilter {
    /// Side inspected.
    pub what: HasWhat,
    /// Restrict to an asset (`None` = base).
    pub asset: Option<String>,
    /// Restrict to an address.
    pub address: Option<Address>,
    /// Exact amount.
    pub amount: Option<u64>,
    /// Lower amount bound.
    pub amount_at_least: Option<u64>,
    /// Upper amount bound.
    pub amount_at_most: Option<u64>,
}

/// Filter over previously seen (stable) units.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenFilter {
    /// Side inspected in the seen unit.
    pub what: HasWhat,
    /// Sending/receiving address.
    pub address: Address,
    /// Exact amount, if constrained.
    pub amount: Option<u64>,
    /// Asset, if constrained (`None` = base).
    pub asset: Option<String>,
}

impl Definition {
    /// Parse the wire JSON form.
    pub fn parse(value: &Value) -> Result<Self, DefinitionError> {
        let arr = value
            .as_array()
            .ok_or_else(|| malformed("definition must be [op, args]"))?;
        let op = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing op"))?;
        let args = arr.get(1).unwrap_or(&Value::Null);
        match op {
            "sig" => Ok(Definition::Sig {
                pubkey: str_field(args, "pubkey")?,
            }),
            "hash" => Ok(Definition::Hash {
                hash: str_field(args, "hash")?,
            }),
            "address" => Ok(Definition::Address(
                args.as_str()
                    .ok_or_else(|| malformed("address arg must be a string"))?
                    .to_string(),
            )),
            "cosigned by" => Ok(Definition::CosignedBy(
                args.as_str()
                    .ok_or_else(|| malformed("cosigned by arg must be a string"))?
                    .to_string(),
            )),
            "not" => Ok(Definition::Not(Box::new(Definition::parse(args)?))),
            "and" => Ok(Definition::And(parse_list(args)?)),
            "or" => Ok(Definition::Or(parse_list(args)?)),
            "r of set" => {
                let required = uint_field(args, "required")? as usize;
                let set = parse_list(args.get("set").unwrap_or(&Value::Null))?;
                Ok(Definition::ROfSet { required, set })
            }
            "weighted and" => {
                let required = uint_field(args, "required")?;
                let set_value = args
                    .get("set")
                    .and_then(Value::as_array)
                    .ok_or_else(|| malformed("weighted and needs a set array"))?;
                let mut set = Vec::with_capacity(set_value.len());
                for entry in set_value {
                    let weight = uint_field(entry, "weight")?;
                    let sub = Definition::parse(
                        entry
                            .get("value")
                            .ok_or_else(|| malformed("weighted entry needs value"))?,
                    )?;
                    set.push((weight, sub));
                }
                Ok(Definition::WeightedAnd { required, set })
            }
            "in data feed" => {
                let arr = args
                    .as_array()
                    .ok_or_else(|| malformed("in data feed args must be an array"))?;
                if arr.len() != 4 {
                    return Err(malformed("in data feed needs [oracles, feed, op, value]"));
                }
                let oracles = string_list(&arr[0])?;
                let feed = arr[1]
                    .as_str()
                    .ok_or_else(|| malformed("feed name must be a string"))?
                    .to_string();
                let rel_op = parse_rel_op(&arr[2])?;
                let value = parse_feed_value(&arr[3])?;
                Ok(Definition::InDataFeed {
                    oracles,
                    feed,
                    rel_op,
                    value,
                })
            }
            "in merkle" => {
                let arr = args
                    .as_array()
                    .ok_or_else(|| malformed("in merkle args must be an array"))?;
                if arr.len() != 3 {
                    return Err(malformed("in merkle needs [oracles, feed, max_depth]"));
                }
                let oracles = string_list(&arr[0])?;
                let feed = arr[1]
                    .as_str()
                    .ok_or_else(|| malformed("feed name must be a string"))?
                    .to_string();
                let max_depth = arr[2]
                    .as_u64()
                    .ok_or_else(|| malformed("max_depth must be an integer"))?
                    as u32;
                Ok(Definition::InMerkle {
                    oracles,
                    feed,
                    max_depth,
                })
            }
            "has" => Ok(Definition::Has(parse_has_filter(args)?)),
            "has one of" => {
                let what = parse_what(args)?;
                let addresses = string_list(args.get("addresses").unwrap_or(&Value::Null))?;
                Ok(Definition::HasOneOf { what, addresses })
            }
            "seen" => {
                let what = parse_what(args)?;
                let address = str_field(args, "address")?;
                let amount = args.get("amount").and_then(Value::as_u64);
                let asset = args
                    .get("asset")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Definition::Seen(SeenFilter {
                    what,
                    address,
                    amount,
                    asset,
                }))
            }
            "sum" => {
                let filter = parse_has_filter(args.get("filter").unwrap_or(&Value::Null))?;
                let rel_op = parse_rel_op(args.get("op").unwrap_or(&Value::Null))?;
                let value = uint_field(args, "value")?;
                Ok(Definition::Sum {
                    filter,
                    rel_op,
                    value,
                })
            }
            "attested" => {
                let address = str_field(args, "address")?;
                let attestors = string_list(args.get("attestors").unwrap_or(&Value::Null))?;
                Ok(Definition::Attested { address, attestors })
            }
            "age" => {
                let rel_op = parse_rel_op(args.get("op").unwrap_or(&Value::Null))?;
                let value = uint_field(args, "value")?;
                Ok(Definition::Age { rel_op, value })
            }
            "formula" => Ok(Definition::Formula(
                args.as_str()
                    .ok_or_else(|| malformed("formula must be a string"))?
                    .to_string(),
            )),
            "definition template" => {
                let hash = str_field(args, "hash")?;
                let params = args
                    .get("params")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Ok(Definition::Template { hash, params })
            }
            other => Err(malformed(&format!("unknown op {other:?}"))),
        }
    }

    /// Operator name, for diagnostics and negation checks.
    pub fn op_name(&self) -> &'static str {
        match self {
            Definition::Sig { .. } => "sig",
            Definition::Hash { .. } => "hash",
            Definition::Address(_) => "address",
            Definition::CosignedBy(_) => "cosigned by",
            Definition::Not(_) => "not",
            Definition::And(_) => "and",
            Definition::Or(_) => "or",
            Definition::ROfSet { .. } => "r of set",
            Definition::WeightedAnd { .. } => "weighted and",
            Definition::InDataFeed { .. } => "in data feed",
            Definition::InMerkle { .. } => "in merkle",
            Definition::Has(_) => "has",
            Definition::HasOneOf { .. } => "has one of",
            Definition::Seen(_) => "seen",
            Definition::Sum { .. } => "sum",
            Definition::Attested { .. } => "attested",
            Definition::Age { .. } => "age",
            Definition::Formula(_) => "formula",
            Definition::Template { .. } => "definition template",
        }
    }
}

fn malformed(msg: &str) -> DefinitionError {
    DefinitionError::Malformed(msg.to_string())
}

fn str_field(args: &Value, field: &str) -> Result<String, DefinitionError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(&format!("missing string field {field:?}")))
}

fn uint_field(args: &Value, field: &str) -> Result<u64, DefinitionError> {
    args.get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(&format!("missing integer field {field:?}")))
}

fn parse_list(args: &Value) -> Result<Vec<Definition>, DefinitionError> {
    let arr = args
        .as_array()
        .ok_or_else(|| malformed("expected an array of sub-definitions"))?;
    if arr.is_empty() {
        return Err(malformed("sub-definition list must be non-empty"));
    }
    arr.iter().map(Definition::parse).collect()
}

fn string_list(args: &Value) -> Result<Vec<String>, DefinitionError> {
    let arr = args
        .as_array()
        .ok_or_else(|| malformed("expected an array of strings"))?;
    if arr.is_empty() {
        return Err(malformed("address list must be non-empty"));
    }
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed("list entries must be strings"))
        })
        .collect()
}

fn parse_rel_op(value: &Value) -> Result<String, DefinitionError> {
    let op = value
        .as_str()
        .ok_or_else(|| malformed("relational op must be a string"))?;
    match op {
        "=" | "!=" | ">" | ">=" | "<" | "<=" => Ok(op.to_string()),
        other => Err(malformed(&format!("unknown relational op {other:?}"))),
    }
}

fn parse_feed_value(value: &Value) -> Result<FeedValue, DefinitionError> {
    match value {
        Value::String(s) => Ok(FeedValue::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(FeedValue::Number)
            .ok_or_else(|| malformed("feed values must be integers or strings")),
        _ => Err(malformed("feed values must be integers or strings")),
    }
}

fn parse_what(args: &Value) -> Result<HasWhat, DefinitionError> {
    match args.get("what").and_then(Value::as_str) {
        Some("input") => Ok(HasWhat::Input),
        Some("output") => Ok(HasWhat::Output),
        _ => Err(malformed("what must be \"input\" or \"output\"")),
    }
}

fn parse_has_filter(args: &Value) -> Result<HasFilter, DefinitionError> {
    Ok(HasFilter {
        what: parse_what(args)?,
        asset: args
            .get("asset")
            .and_then(Value::as_str)
            .map(str::to_string),
        address: args
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string),
        amount: args.get("amount").and_then(Value::as_u64),
        amount_at_least: args.get("amount_at_least").and_then(Value::as_u64),
        amount_at_most: args.get("amount_at_most").and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_sig() {
        let def = Definition::parse(&json!(["sig", {"pubkey": "PK"}])).unwrap();
        assert_eq!(def, Definition::Sig { pubkey: "PK".into() });
    }

    #[test]
    fn parses_nested_combinators() {
        let def = Definition::parse(&json!([
            "or",
            [
                ["sig", {"pubkey": "PK1"}],
                ["and", [["sig", {"pubkey": "PK2"}], ["sig", {"pubkey": "PK3"}]]]
            ]
        ]))
        .unwrap();
        match def {
            Definition::Or(subs) => assert_eq!(subs.len(), 2),
            other => panic!("expected or, got {other:?}"),
        }
    }

    #[test]
    fn parses_weighted_and() {
        let def = Definition::parse(&json!([
            "weighted and",
            {
                "required": 3,
                "set": [
                    {"weight": 2, "value": ["sig", {"pubkey": "A"}]},
                    {"weight": 1, "value": ["sig", {"pubkey": "B"}]}
                ]
            }
        ]))
        .unwrap();
        match def {
            Definition::WeightedAnd { required, set } => {
                assert_eq!(required, 3);
                assert_eq!(set[0].0, 2);
            }
            other => panic!("expected weighted and, got {other:?}"),
        }
    }

    #[test]
    fn parses_in_data_feed() {
        let def = Definition::parse(&json!([
            "in data feed",
            [["ORACLE1"], "timestamp_feed", ">", 1000]
        ]))
        .unwrap();
        assert_eq!(def.op_name(), "in data feed");
    }

    #[test]
    fn rejects_unknown_op() {
        assert!(matches!(
            Definition::parse(&json!(["frobnicate", {}])),
            Err(DefinitionError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_empty_combinator() {
        assert!(Definition::parse(&json!(["and", []])).is_err());
    }

    #[test]
    fn rejects_float_feed_value() {
        assert!(Definition::parse(&json!([
            "in data feed",
            [["O"], "f", "=", 1.5]
        ]))
        .is_err());
    }
}
