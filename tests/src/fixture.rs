//! # Network Fixture
//!
//! One private network shared by every test in this binary: twelve fixed
//! operator keys, a fixed genesis timestamp, and therefore one network
//! identity that the process-wide parameter installation accepts from
//! every test. Each test still gets its own store in a temp directory.

use bc_01_hashing::{header_size, payload_hash_b64, payload_size, unit_digest, unit_id};
use node_runtime::{
    build_genesis, Composer, Ed25519Signer, GenesisSpec, Intake, IntakeOutcome, Node, NodeConfig,
};
use node_runtime::config::GenesisConfig;
use serde_json::Value;
use shared_types::{
    Address, Author, Input, Joint, Message, MessageBody, Output, PayloadLocation, PaymentPayload,
    Unit, UnitId, UnitProps, ALT, MAX_PARENTS_PER_UNIT, VERSION,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// The network-defining timestamp. Changing it changes the genesis id and
/// every test's expectations.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Funds granted to each operator at genesis.
pub const OPERATOR_GRANT: u64 = 50_000_000;

/// Funds granted to Alice at genesis.
pub const ALICE_GRANT: u64 = 1_000_000;

/// A bootstrapped single-node network.
pub struct TestNet {
    _dir: TempDir,
    /// The wired node.
    pub node: Node,
    /// Operator keys, sorted by address (unit author order).
    pub operators: Vec<Ed25519Signer>,
    /// The genesis unit id.
    pub genesis_unit: UnitId,
}

/// Alice's key (funded at genesis).
pub fn alice() -> Ed25519Signer {
    Ed25519Signer::from_bytes(&[100u8; 32])
}

/// Bob's key (unfunded; receives).
pub fn bob() -> Ed25519Signer {
    Ed25519Signer::from_bytes(&[101u8; 32])
}

/// Carol's key (unfunded; receives).
pub fn carol() -> Ed25519Signer {
    Ed25519Signer::from_bytes(&[102u8; 32])
}

/// The key Alice rotates to.
pub fn alice_next() -> Ed25519Signer {
    Ed25519Signer::from_bytes(&[103u8; 32])
}

/// The twelve operator keys, sorted by address.
pub fn operator_signers() -> Vec<Ed25519Signer> {
    let mut signers: Vec<Ed25519Signer> = (0..12u8)
        .map(|i| Ed25519Signer::from_bytes(&[i + 1; 32]))
        .collect();
    signers.sort_by_key(|s| s.address());
    signers
}

/// Wall clock, for intake timestamps.
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn genesis_grants() -> Vec<(Address, u64)> {
    let mut grants: Vec<(Address, u64)> = operator_signers()
        .iter()
        .map(|op| (op.address(), OPERATOR_GRANT))
        .collect();
    grants.push((alice().address(), ALICE_GRANT));
    grants
}

/// Bootstrap a fresh node on the shared network identity and feed it the
/// genesis joint (which stabilizes immediately).
pub async fn spawn_network() -> TestNet {
    let operators = operator_signers();
    let spec = GenesisSpec {
        operators: &operators,
        initial_outputs: genesis_grants(),
        timestamp: GENESIS_TIMESTAMP,
    };
    let (genesis_joint, params) = build_genesis(&spec).expect("genesis builds");

    let dir = TempDir::new().expect("temp dir");
    let mut config = NodeConfig::default();
    config.database.path = dir.path().to_string_lossy().into_owned();
    config.genesis = Some(GenesisConfig {
        unit: params.genesis_unit.clone(),
        operators: params.genesis_operators.clone(),
    });
    let node = Node::bootstrap(config).expect("node bootstraps");

    let outcome = node
        .intake
        .handle_joint(genesis_joint, "fixture", now())
        .await;
    let genesis_unit = match outcome {
        IntakeOutcome::Saved { unit, ref stabilized } => {
            assert!(stabilized.contains(&0), "genesis stabilizes at mci 0");
            unit
        }
        other => panic!("genesis not accepted: {other:?}"),
    };
    assert_eq!(genesis_unit, params.genesis_unit);

    TestNet {
        _dir: dir,
        node,
        operators,
        genesis_unit,
    }
}

impl TestNet {
    /// Submit a joint, asserting acceptance.
    pub async fn submit(&self, joint: Joint) -> (UnitId, Vec<u64>) {
        match self.node.intake.handle_joint(joint, "fixture", now()).await {
            IntakeOutcome::Saved { unit, stabilized } => (unit, stabilized),
            other => panic!("joint not accepted: {other:?}"),
        }
    }

    /// Submit a joint, returning the raw outcome.
    pub async fn submit_raw(&self, joint: Joint) -> IntakeOutcome {
        self.node.intake.handle_joint(joint, "fixture", now()).await
    }

    /// The intake pipeline (for dependency tests).
    pub fn intake(&self) -> &Intake {
        &self.node.intake
    }

    /// The composer.
    pub fn composer(&self) -> &Composer {
        &self.node.composer
    }

    /// Props of a saved unit.
    pub fn props(&self, unit: &str) -> UnitProps {
        self.node
            .store
            .unit_props(unit)
            .expect("store read")
            .unwrap_or_else(|| panic!("unknown unit {unit}"))
    }

    /// Compose-and-save one witnessing round: operator `index` posts a
    /// self-payment on the current tips.
    pub async fn pump_one(&self, index: usize) -> UnitId {
        let op = &self.operators[index % self.operators.len()];
        let joint = self
            .composer()
            .compose_payment(op, &[])
            .await
            .expect("operator composes");
        let (unit, _) = self.submit(joint).await;
        unit
    }

    /// Run `rounds` witnessing rounds.
    pub async fn pump(&self, rounds: usize) {
        for i in 0..rounds {
            self.pump_one(i).await;
        }
    }

    /// Pump until `unit` stabilizes (bounded; panics if it never does).
    pub async fn pump_until_stable(&self, unit: &str) {
        for i in 0..60 {
            if self.props(unit).is_stable {
                return;
            }
            self.pump_one(i).await;
        }
        panic!("unit {unit} did not stabilize within the pump budget");
    }

    /// Sum of unspent base outputs held by `address` in stable good
    /// units plus unstable ones (wallet view).
    pub fn balance_of(&self, address: &str) -> u64 {
        self.node
            .store
            .outputs_of_address(address, 10_000)
            .expect("store read")
            .into_iter()
            .filter(|(_, row)| !row.is_spent && row.asset.is_none())
            .filter(|((unit, _, _), _)| {
                self.props(unit).sequence == shared_types::Sequence::Good
            })
            .map(|(_, row)| row.amount)
            .sum()
    }

    /// Hand-craft a signed payment unit, with control over the revealed
    /// definition and the signing key - the composer always uses the
    /// address's own key, which key-rotation tests must deviate from.
    pub async fn craft_payment(
        &self,
        address: &Address,
        reveal_definition: Option<Value>,
        sign_with: &Ed25519Signer,
        recipients: &[(Address, u64)],
        extra_messages: Vec<MessageBody>,
    ) -> Joint {
        let store = &self.node.store;
        let last_stable = store.last_stable_mci();
        let last_ball_unit = store
            .mc_unit_at(last_stable)
            .unwrap()
            .expect("stable anchor");
        let last_ball = store.ball_of_unit(&last_ball_unit).unwrap().expect("ball");
        let mut parents = store.free_units().unwrap();
        parents.sort();
        parents.truncate(MAX_PARENTS_PER_UNIT);

        let target: u64 = recipients.iter().map(|(_, a)| a).sum();
        let mut available = 0u64;
        let mut selected: Vec<(UnitId, u32, u32)> = Vec::new();
        for ((unit, msg, out), row) in store.outputs_of_address(address, 10_000).unwrap() {
            if row.is_spent || row.asset.is_some() {
                continue;
            }
            if store.serial_spender_of(&unit, msg, out).unwrap().is_some() {
                continue;
            }
            available += row.amount;
            selected.push((unit, msg, out));
            if available > target.saturating_mul(2).saturating_add(200_000) {
                break;
            }
        }

        let required_fee = bc_09_tps_fees::min_tps_fee(store, last_stable).unwrap();
        let balance = store.tps_balance_at(address, last_stable).unwrap();
        let declared_fee = (required_fee as i64 - balance).max(0) as u64;

        let mut change = 0u64;
        for _ in 0..6 {
            let unit = self.assemble_crafted(
                address,
                &reveal_definition,
                &parents,
                &last_ball,
                &last_ball_unit,
                &selected,
                recipients,
                &extra_messages,
                change,
                declared_fee,
            );
            let header = u64::from(header_size(&unit).unwrap());
            let payload = u64::from(payload_size(&unit).unwrap());
            let required = target + header + payload + declared_fee;
            assert!(
                available >= required,
                "crafted unit underfunded: {available} < {required}"
            );
            let next_change = available - required;
            if next_change == change {
                let mut unit = self.assemble_crafted(
                    address,
                    &reveal_definition,
                    &parents,
                    &last_ball,
                    &last_ball_unit,
                    &selected,
                    recipients,
                    &extra_messages,
                    change,
                    declared_fee,
                );
                unit.headers_commission = header as u32;
                unit.payload_commission = payload as u32;
                let digest = unit_digest(&unit).unwrap();
                unit.authors[0]
                    .authentifiers
                    .insert("r".into(), sign_with.sign_digest(&digest));
                unit.unit = Some(unit_id(&unit).unwrap());
                return Joint::from_unit(unit);
            }
            change = next_change;
        }
        panic!("crafted unit commissions did not converge");
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_crafted(
        &self,
        address: &Address,
        reveal_definition: &Option<Value>,
        parents: &[UnitId],
        last_ball: &str,
        last_ball_unit: &str,
        selected: &[(UnitId, u32, u32)],
        recipients: &[(Address, u64)],
        extra_messages: &[MessageBody],
        change: u64,
        declared_fee: u64,
    ) -> Unit {
        let inputs: Vec<Input> = selected
            .iter()
            .map(|(unit, msg, out)| Input::Transfer {
                unit: unit.clone(),
                message_index: *msg,
                output_index: *out,
            })
            .collect();
        let mut outputs: Vec<Output> = recipients
            .iter()
            .map(|(to, amount)| Output {
                address: to.clone(),
                amount: *amount,
                blinding: None,
                output_hash: None,
            })
            .collect();
        if change > 0 {
            outputs.push(Output {
                address: address.clone(),
                amount: change,
                blinding: None,
                output_hash: None,
            });
        }
        outputs.sort_by(|a, b| (&a.address, a.amount).cmp(&(&b.address, b.amount)));

        let payment = PaymentPayload {
            asset: None,
            denomination: None,
            inputs,
            outputs,
        };
        let mut messages = vec![message_of(MessageBody::Payment(payment))];
        for body in extra_messages {
            messages.push(message_of(body.clone()));
        }

        let mut parent_ts = GENESIS_TIMESTAMP;
        for parent in parents {
            parent_ts = parent_ts.max(self.props(parent).timestamp);
        }

        let mut authentifiers = BTreeMap::new();
        authentifiers.insert("r".to_string(), Ed25519Signer::placeholder_authentifier());

        Unit {
            version: VERSION.into(),
            alt: ALT.into(),
            unit: None,
            parent_units: parents.to_vec(),
            last_ball: Some(last_ball.to_string()),
            last_ball_unit: Some(last_ball_unit.to_string()),
            witness_list_unit: Some(self.genesis_unit.clone()),
            witnesses: None,
            timestamp: parent_ts.max(now()),
            authors: vec![Author {
                address: address.clone(),
                definition: reveal_definition.clone(),
                authentifiers,
            }],
            messages,
            earned_headers_commission_recipients: None,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: Some(declared_fee),
            content_hash: None,
        }
    }
}

/// Wrap a body as an inline message with its payload hash.
pub fn message_of(body: MessageBody) -> Message {
    let value = serde_json::to_value(&body).expect("body serializes");
    let payload = value.get("payload").cloned().expect("body has payload");
    Message {
        payload_hash: payload_hash_b64(&payload, true).expect("payload hashes"),
        body,
        payload_location: PayloadLocation::Inline,
    }
}
