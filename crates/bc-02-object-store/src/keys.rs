//! # Key Grammar
//!
//! Every table is a key prefix; fields are joined by `\n`, which cannot
//! appear in base64/base32 identifiers. MCIs are zero-padded decimal so
//! lexicographic key order equals numeric order; signed feed values use an
//! offset encoding for the same reason. The grammar is stable: changing a
//! prefix is a storage-format break.

use shared_types::{SystemSubject, UnitId};

const SEP: u8 = b'\n';

/// Builds a key from a prefix and `\n`-joined parts.
pub fn key(prefix: &str, parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>());
    out.extend_from_slice(prefix.as_bytes());
    for part in parts {
        out.push(SEP);
        out.extend_from_slice(part.as_bytes());
    }
    out
}

/// Prefix for a range scan over all keys below `prefix` + parts.
pub fn scan_prefix(prefix: &str, parts: &[&str]) -> Vec<u8> {
    let mut out = key(prefix, parts);
    out.push(SEP);
    out
}

/// Zero-padded MCI for ordered keys.
pub fn mci_part(mci: u64) -> String {
    format!("{mci:012}")
}

/// Order-preserving encoding of a signed 64-bit feed value.
pub fn i64_ordered(value: i64) -> String {
    let shifted = (value as i128) + (1i128 << 63);
    format!("{shifted:020}")
}

/// Inverse of [`i64_ordered`].
pub fn i64_from_ordered(text: &str) -> Option<i64> {
    let shifted: i128 = text.parse().ok()?;
    let value = shifted - (1i128 << 63);
    i64::try_from(value).ok()
}

/// The last path component of a key, as UTF-8.
pub fn last_part(key: &[u8]) -> String {
    let idx = key.iter().rposition(|&b| b == SEP).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&key[idx..]).into_owned()
}

/// Splits a key into its `\n`-separated parts, prefix included.
pub fn parts(key: &[u8]) -> Vec<String> {
    key.split(|&b| b == SEP)
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Row tables
// ---------------------------------------------------------------------------

/// `u\n<unit>` → [`crate::rows::UnitRow`]
pub fn unit(unit: &str) -> Vec<u8> {
    key("u", &[unit])
}

/// `ch\n<parent>\n<child>` → () - children index.
pub fn child(parent: &str, child_unit: &str) -> Vec<u8> {
    key("ch", &[parent, child_unit])
}

/// Scan prefix over the children of `parent`.
pub fn children_of(parent: &str) -> Vec<u8> {
    scan_prefix("ch", &[parent])
}

/// `au\n<unit>\n<address>` → [`crate::rows::AuthorRow`]
pub fn author(unit: &str, address: &str) -> Vec<u8> {
    key("au", &[unit, address])
}

/// `ua\n<address>\n<unit>` → () - units by author.
pub fn unit_by_author(address: &str, unit: &str) -> Vec<u8> {
    key("ua", &[address, unit])
}

/// Scan prefix over units authored by `address`.
pub fn units_of_author(address: &str) -> Vec<u8> {
    scan_prefix("ua", &[address])
}

/// `o\n<unit>\n<msg>\n<out>` → [`crate::rows::OutputRow`]
pub fn output(unit: &str, message_index: u32, output_index: u32) -> Vec<u8> {
    key(
        "o",
        &[unit, &message_index.to_string(), &output_index.to_string()],
    )
}

/// `oa\n<address>\n<unit>\n<msg>\n<out>` → () - outputs by address.
pub fn output_by_address(address: &str, unit: &str, message_index: u32, output_index: u32) -> Vec<u8> {
    key(
        "oa",
        &[
            address,
            unit,
            &message_index.to_string(),
            &output_index.to_string(),
        ],
    )
}

/// Scan prefix over outputs owned by `address`.
pub fn outputs_of_address(address: &str) -> Vec<u8> {
    scan_prefix("oa", &[address])
}

/// `i\n<unit>\n<msg>\n<in>` → [`crate::rows::InputRow`]
pub fn input(unit: &str, message_index: u32, input_index: u32) -> Vec<u8> {
    key(
        "i",
        &[unit, &message_index.to_string(), &input_index.to_string()],
    )
}

/// `sp\n<src_unit>\n<src_msg>\n<src_out>\n<spender>` → () - all spenders
/// of a source output, conflicts included.
pub fn spender(src_unit: &str, src_msg: u32, src_out: u32, spender_unit: &str) -> Vec<u8> {
    key(
        "sp",
        &[
            src_unit,
            &src_msg.to_string(),
            &src_out.to_string(),
            spender_unit,
        ],
    )
}

/// Scan prefix over spenders of one source output.
pub fn spenders_of(src_unit: &str, src_msg: u32, src_out: u32) -> Vec<u8> {
    scan_prefix("sp", &[src_unit, &src_msg.to_string(), &src_out.to_string()])
}

/// `spu\n<src_unit>\n<src_msg>\n<src_out>` → spender unit. Present only
/// for serial (`is_unique`) spends; this key IS the uniqueness constraint.
pub fn serial_spender(src_unit: &str, src_msg: u32, src_out: u32) -> Vec<u8> {
    key(
        "spu",
        &[src_unit, &src_msg.to_string(), &src_out.to_string()],
    )
}

/// `b\n<unit>` → ball id.
pub fn ball_of_unit(unit: &str) -> Vec<u8> {
    key("b", &[unit])
}

/// `bu\n<ball>` → unit id.
pub fn unit_of_ball(ball: &str) -> Vec<u8> {
    key("bu", &[ball])
}

/// `htb\n<ball>` → unit id - catchup hash tree.
pub fn hash_tree_ball(ball: &str) -> Vec<u8> {
    key("htb", &[ball])
}

/// `d\n<chash>` → [`crate::rows::DefinitionRow`]
pub fn definition(chash: &str) -> Vec<u8> {
    key("d", &[chash])
}

/// `adc\n<address>\n<mci>\n<unit>` → new definition chash.
pub fn definition_change(address: &str, mci: u64, unit: &str) -> Vec<u8> {
    key("adc", &[address, &mci_part(mci), unit])
}

/// Scan prefix over definition changes of `address`.
pub fn definition_changes_of(address: &str) -> Vec<u8> {
    scan_prefix("adc", &[address])
}

/// `att\n<attestor>\n<attested>\n<unit>` → profile JSON.
pub fn attestation(attestor: &str, attested: &str, unit: &str) -> Vec<u8> {
    key("att", &[attestor, attested, unit])
}

/// Scan prefix over attestations issued by `attestor` for `attested`.
pub fn attestations_by(attestor: &str, attested: &str) -> Vec<u8> {
    scan_prefix("att", &[attestor, attested])
}

/// `as\n<asset_unit>` → [`crate::rows::AssetRow`]
pub fn asset(asset_unit: &str) -> Vec<u8> {
    key("as", &[asset_unit])
}

/// `aa\n<address>` → [`crate::rows::AaRow`]
pub fn aa_address(address: &str) -> Vec<u8> {
    key("aa", &[address])
}

/// `aat\n<mci>\n<pos>\n<unit>` → [`crate::rows::AaTriggerRow`]
pub fn aa_trigger(mci: u64, position: u32, unit: &str) -> Vec<u8> {
    key("aat", &[&mci_part(mci), &format!("{position:06}"), unit])
}

/// Scan prefix over the triggers of one MCI, in deterministic order.
pub fn aa_triggers_of_mci(mci: u64) -> Vec<u8> {
    scan_prefix("aat", &[&mci_part(mci)])
}

/// `aar\n<trigger_unit>` → [`crate::rows::AaResponseRow`]
pub fn aa_response(trigger_unit: &str) -> Vec<u8> {
    key("aar", &[trigger_unit])
}

/// `aab\n<aa_address>\n<asset>` → balance.
pub fn aa_balance(aa: &str, asset: &str) -> Vec<u8> {
    key("aab", &[aa, asset])
}

/// `sv\n<subject>\n<address>` → [`crate::rows::SystemVoteRow`] - one
/// active vote per (subject, address) by key construction.
pub fn system_vote(subject: SystemSubject, address: &str) -> Vec<u8> {
    key("sv", &[subject_part(subject), address])
}

/// Scan prefix over all votes for `subject`.
pub fn system_votes_of(subject: SystemSubject) -> Vec<u8> {
    scan_prefix("sv", &[subject_part(subject)])
}

/// `svv\n<subject>\n<mci>` → governed value effective from `mci`.
pub fn system_var(subject: SystemSubject, mci: u64) -> Vec<u8> {
    key("svv", &[subject_part(subject), &mci_part(mci)])
}

/// Scan prefix over the value history of `subject`.
pub fn system_var_history(subject: SystemSubject) -> Vec<u8> {
    scan_prefix("svv", &[subject_part(subject)])
}

/// `tf\n<address>\n<mci>` → signed fee balance effective at `mci`.
pub fn tps_balance(address: &str, mci: u64) -> Vec<u8> {
    key("tf", &[address, &mci_part(mci)])
}

/// Scan prefix over the fee balance history of `address`.
pub fn tps_balance_history(address: &str) -> Vec<u8> {
    scan_prefix("tf", &[address])
}

/// `kb\n<unit>` → [`crate::rows::KnownBadRow`]
pub fn known_bad(unit_or_hash: &str) -> Vec<u8> {
    key("kb", &[unit_or_hash])
}

/// `uh\n<unit>` → [`crate::rows::UnhandledRow`]
pub fn unhandled(unit: &str) -> Vec<u8> {
    key("uh", &[unit])
}

/// `dep\n<waited>\n<waiting>` → () - dependency edges.
pub fn dependency(waited: &str, waiting: &str) -> Vec<u8> {
    key("dep", &[waited, waiting])
}

/// Scan prefix over joints waiting for `waited`.
pub fn dependents_of(waited: &str) -> Vec<u8> {
    scan_prefix("dep", &[waited])
}

/// `ar\n<unit>` → archived joint JSON.
pub fn archived(unit: &str) -> Vec<u8> {
    key("ar", &[unit])
}

/// `mc\n<mci>` → main-chain unit at this index.
pub fn mc_unit(mci: u64) -> Vec<u8> {
    key("mc", &[&mci_part(mci)])
}

/// `smci\n<mci>\n<unit>` → () - stable units grouped by MCI.
pub fn stable_by_mci(mci: u64, unit: &str) -> Vec<u8> {
    key("smci", &[&mci_part(mci), unit])
}

/// Scan prefix over the stable units of one MCI.
pub fn stable_units_of_mci(mci: u64) -> Vec<u8> {
    scan_prefix("smci", &[&mci_part(mci)])
}

/// `unst\n<unit>` → () - not-yet-stable units (cache rebuild set).
pub fn unstable(unit: &str) -> Vec<u8> {
    key("unst", &[unit])
}

/// `free\n<unit>` → () - current tips.
pub fn free(unit: &str) -> Vec<u8> {
    key("free", &[unit])
}

/// `meta\n<name>` → store-level scalar state.
pub fn meta(name: &str) -> Vec<u8> {
    key("meta", &[name])
}

fn subject_part(subject: SystemSubject) -> &'static str {
    match subject {
        SystemSubject::OpList => "op_list",
        SystemSubject::ThresholdSize => "threshold_size",
        SystemSubject::BaseTpsFee => "base_tps_fee",
        SystemSubject::TpsInterval => "tps_interval",
        SystemSubject::TpsFeeMultiplier => "tps_fee_multiplier",
    }
}

// ---------------------------------------------------------------------------
// KV namespaces
// ---------------------------------------------------------------------------

/// `j\n<unit>` → joint JSON.
pub fn kv_joint(unit: &UnitId) -> Vec<u8> {
    key("j", &[unit])
}

/// `df\n<address>\n<feed>\n<type>\n<value>\n<mci>` → posting unit.
pub fn kv_data_feed(address: &str, feed: &str, type_tag: &str, value: &str, mci: u64) -> Vec<u8> {
    key("df", &[address, feed, type_tag, value, &mci_part(mci)])
}

/// Scan prefix over one (address, feed) pair, both value types.
pub fn kv_data_feed_prefix(address: &str, feed: &str) -> Vec<u8> {
    scan_prefix("df", &[address, feed])
}

/// `dfv\n<address>\n<feed>` → latest value row.
pub fn kv_data_feed_latest(address: &str, feed: &str) -> Vec<u8> {
    key("dfv", &[address, feed])
}

/// `st\n<aa_address>\n<var>` → state var JSON.
pub fn kv_state_var(aa: &str, var: &str) -> Vec<u8> {
    key("st", &[aa, var])
}

/// Scan prefix over all state vars of one AA.
pub fn kv_state_vars_of(aa: &str) -> Vec<u8> {
    scan_prefix("st", &[aa])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_with_newline() {
        assert_eq!(key("u", &["U1"]), b"u\nU1".to_vec());
        assert_eq!(key("o", &["U1", "0", "2"]), b"o\nU1\n0\n2".to_vec());
    }

    #[test]
    fn mci_part_orders_lexicographically() {
        assert!(mci_part(9) < mci_part(10));
        assert!(mci_part(999) < mci_part(1000));
    }

    #[test]
    fn i64_ordered_preserves_order() {
        let values = [-5i64, -1, 0, 1, 100];
        let encoded: Vec<String> = values.iter().map(|&v| i64_ordered(v)).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn i64_ordered_roundtrips() {
        for v in [i64::MIN, -42, 0, 7, i64::MAX] {
            assert_eq!(i64_from_ordered(&i64_ordered(v)), Some(v));
        }
    }

    #[test]
    fn last_part_extracts_suffix() {
        let k = key("ch", &["PARENT", "CHILD"]);
        assert_eq!(last_part(&k), "CHILD");
    }
}
