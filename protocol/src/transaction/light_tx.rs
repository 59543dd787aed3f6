//! Light transactions: parsing, normalization and hashing.
//!
//! A client submits
//!
//! ```json
//! {
//!   "lightTxData": { "from": "...", "to": "...", "value": "1.5", "fee": "0.01",
//!                    "LSN": 3, "stageHeight": 12 },
//!   "sig": { "clientLightTx": { "v": 28, "r": "0x...", "s": "0x..." },
//!            "serverLightTx": {} }
//! }
//! ```
//!
//! and we normalize every data field to 64 hex chars before doing anything
//! else. The canonical hash is `keccak256(from ++ to ++ value ++ fee ++ LSN
//! ++ stageHeight)` over the normalized hex text, in exactly that order.
//!
//! ## Numeric fields
//!
//! `value` and `fee` are either a 64-hex-char integer (optionally `0x`
//! prefixed) taken verbatim as wei, or a decimal in whole units that is
//! scaled by 10^18. `LSN` and `stageHeight` follow the same rule without
//! scaling. Decimal conversion is exact: a value that cannot be expressed
//! in whole wei is rejected instead of rounded.

use std::borrow::Cow;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::types::{
    field_to_u256, is_zero_field, u256_to_field, LightTxSignature, LightTxType, ProposalKind,
};
use crate::config::{FIELD_HEX_LEN, INSTANT_WITHDRAWAL_LIMIT, WEI_DECIMALS, ZERO_ADDRESS};
use crate::crypto::hash::{hash_concat, strip_hex_prefix};
use crate::crypto::keys::EthKeypair;
use crate::crypto::signatures::{RecoverableSignature, SignatureError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a payload cannot become a [`LightTransaction`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LightTxError {
    /// The payload does not match the expected JSON shape (missing key,
    /// wrong type, stray key inside a signature slot).
    #[error("malformed light transaction payload: {0}")]
    Schema(String),

    /// A numeric field could not be turned into a 256-bit integer.
    #[error("'{value}' can not be parsed to an integer for {field}: {reason}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// An address field is not hex or is wider than 32 bytes.
    #[error("invalid address in {field}: '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    /// A signature slot has the right keys but unusable contents.
    #[error("malformed signature in {slot}: {reason}")]
    MalformedSignature { slot: &'static str, reason: String },

    /// Both `from` and `to` are the zero address.
    #[error("light transaction has no account endpoint")]
    NoEndpoint,

    /// `stageHeight` does not fit in 64 bits.
    #[error("stage height {0} is out of range")]
    StageHeightOutOfRange(String),
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// A JSON scalar that may arrive as a string or a bare number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
}

impl FieldValue {
    fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s.as_str()),
            Self::Number(n) => Cow::Owned(n.to_string()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// `lightTxData` as submitted. Keys outside the schema are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightTxDataPayload {
    pub from: FieldValue,
    pub to: FieldValue,
    pub value: FieldValue,
    pub fee: FieldValue,
    #[serde(rename = "LSN")]
    pub lsn: FieldValue,
    pub stage_height: FieldValue,
}

/// A signature slot as submitted: either `{}` or exactly `{r, s, v}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSignature {
    pub v: Option<FieldValue>,
    pub r: Option<String>,
    pub s: Option<String>,
}

/// `sig` as submitted. Missing slots default to `{}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigPayload {
    #[serde(default, rename = "clientLightTx")]
    pub client: RawSignature,
    #[serde(default, rename = "serverLightTx")]
    pub server: RawSignature,
}

/// The complete submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LightTxPayload {
    #[serde(rename = "lightTxData")]
    pub data: LightTxDataPayload,
    #[serde(default)]
    pub sig: SigPayload,
}

/// A parent-chain deposit or withdrawal proposal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalEvent {
    pub client: String,
    pub value: String,
    pub fee: String,
    pub lsn: String,
    pub stage_height: String,
    pub v: u64,
    pub r: String,
    pub s: String,
}

// ---------------------------------------------------------------------------
// Normalized form
// ---------------------------------------------------------------------------

/// Normalized transaction fields, each exactly 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightTxData {
    pub from: String,
    pub to: String,
    pub value: String,
    pub fee: String,
    #[serde(rename = "LSN")]
    pub lsn: String,
    pub stage_height: String,
}

impl LightTxData {
    /// Normalize raw field text. See the module docs for accepted forms.
    pub fn new(from: &str, to: &str, value: &str, fee: &str, lsn: &str, stage_height: &str) -> Result<Self, LightTxError> {
        Self::from_payload(&LightTxDataPayload {
            from: from.into(),
            to: to.into(),
            value: value.into(),
            fee: fee.into(),
            lsn: lsn.into(),
            stage_height: stage_height.into(),
        })
    }

    fn from_payload(raw: &LightTxDataPayload) -> Result<Self, LightTxError> {
        let data = Self {
            from: normalize_address("from", &raw.from.as_text())?,
            to: normalize_address("to", &raw.to.as_text())?,
            value: normalize_number("value", &raw.value.as_text(), true)?,
            fee: normalize_number("fee", &raw.fee.as_text(), true)?,
            lsn: normalize_number("LSN", &raw.lsn.as_text(), false)?,
            stage_height: normalize_number("stageHeight", &raw.stage_height.as_text(), false)?,
        };
        if is_zero_field(&data.from) && is_zero_field(&data.to) {
            return Err(LightTxError::NoEndpoint);
        }
        let stage = field_to_u256(&data.stage_height).unwrap_or_default();
        if stage > U256::from(u64::MAX) {
            return Err(LightTxError::StageHeightOutOfRange(data.stage_height));
        }
        Ok(data)
    }

    fn hash(&self) -> String {
        hash_concat([
            self.from.as_str(),
            self.to.as_str(),
            self.value.as_str(),
            self.fee.as_str(),
            self.lsn.as_str(),
            self.stage_height.as_str(),
        ])
    }
}

/// Both signature slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signatures {
    pub client: Option<LightTxSignature>,
    pub server: Option<LightTxSignature>,
}

/// A normalized, hashed light transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightTransaction {
    light_tx_hash: String,
    data: LightTxData,
    sig: Signatures,
}

impl LightTransaction {
    /// Wrap normalized data with empty signature slots.
    pub fn unsigned(data: LightTxData) -> Self {
        Self {
            light_tx_hash: data.hash(),
            data,
            sig: Signatures::default(),
        }
    }

    /// Parse a submission from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, LightTxError> {
        let payload: LightTxPayload =
            serde_json::from_str(json).map_err(|e| LightTxError::Schema(e.to_string()))?;
        Self::from_payload(payload)
    }

    /// Parse a submission from an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, LightTxError> {
        let payload: LightTxPayload =
            serde_json::from_value(value).map_err(|e| LightTxError::Schema(e.to_string()))?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: LightTxPayload) -> Result<Self, LightTxError> {
        let data = LightTxData::from_payload(&payload.data)?;
        let sig = Signatures {
            client: signature_slot("clientLightTx", payload.sig.client)?,
            server: signature_slot("serverLightTx", payload.sig.server)?,
        };
        Ok(Self {
            light_tx_hash: data.hash(),
            data,
            sig,
        })
    }

    /// Build the light transaction a parent-chain proposal stands for.
    /// The proposer's signature goes in the client slot.
    pub fn from_proposal(kind: ProposalKind, event: &ProposalEvent) -> Result<Self, LightTxError> {
        let (from, to) = match kind {
            ProposalKind::Deposit => ("0", event.client.as_str()),
            ProposalKind::Withdrawal => (event.client.as_str(), "0"),
        };
        let data = LightTxData::new(from, to, &event.value, &event.fee, &event.lsn, &event.stage_height)?;
        let client = signature_slot(
            "clientLightTx",
            RawSignature {
                v: Some(FieldValue::Number(event.v.into())),
                r: Some(event.r.clone()),
                s: Some(event.s.clone()),
            },
        )?;
        let mut tx = Self::unsigned(data);
        tx.sig.client = client;
        Ok(tx)
    }

    // -- Accessors ---------------------------------------------------------

    pub fn light_tx_hash(&self) -> &str {
        &self.light_tx_hash
    }

    pub fn data(&self) -> &LightTxData {
        &self.data
    }

    pub fn signatures(&self) -> &Signatures {
        &self.sig
    }

    pub fn has_client_signature(&self) -> bool {
        self.sig.client.is_some()
    }

    pub fn has_server_signature(&self) -> bool {
        self.sig.server.is_some()
    }

    pub fn value(&self) -> U256 {
        field_to_u256(&self.data.value).unwrap_or_default()
    }

    pub fn fee(&self) -> U256 {
        field_to_u256(&self.data.fee).unwrap_or_default()
    }

    pub fn lsn(&self) -> U256 {
        field_to_u256(&self.data.lsn).unwrap_or_default()
    }

    /// The target stage. Construction guarantees it fits in 64 bits.
    pub fn stage_height(&self) -> u64 {
        field_to_u256(&self.data.stage_height)
            .unwrap_or_default()
            .low_u64()
    }

    /// Classify by endpoints and value.
    pub fn kind(&self) -> LightTxType {
        if is_zero_field(&self.data.from) {
            LightTxType::Deposit
        } else if is_zero_field(&self.data.to) {
            let limit = U256::from(INSTANT_WITHDRAWAL_LIMIT) * U256::exp10(WEI_DECIMALS);
            if self.value() > limit {
                LightTxType::Withdrawal
            } else {
                LightTxType::InstantWithdrawal
            }
        } else {
            LightTxType::Remittance
        }
    }

    // -- Signing -----------------------------------------------------------

    /// Fill the client slot by `eth_sign`ing the hash with `keypair`.
    pub fn sign_client(&mut self, keypair: &EthKeypair) -> Result<(), SignatureError> {
        self.sig.client = Some(keypair.sign_digest_hex(&self.light_tx_hash)?.into());
        Ok(())
    }

    /// Fill the server slot by `eth_sign`ing the hash with `keypair`.
    pub fn sign_server(&mut self, keypair: &EthKeypair) -> Result<(), SignatureError> {
        self.sig.server = Some(keypair.sign_digest_hex(&self.light_tx_hash)?.into());
        Ok(())
    }

    // -- Wire form ---------------------------------------------------------

    /// `{lightTxHash, lightTxData, sig}`, with empty slots as `{}`. The
    /// output parses back into an identical transaction.
    pub fn to_json(&self) -> Value {
        json!({
            "lightTxHash": self.light_tx_hash,
            "lightTxData": self.data,
            "sig": {
                "clientLightTx": slot_json(&self.sig.client),
                "serverLightTx": slot_json(&self.sig.server),
            },
        })
    }
}

fn slot_json(slot: &Option<LightTxSignature>) -> Value {
    match slot {
        Some(sig) => json!({
            "v": sig.v,
            "r": format!("0x{}", sig.r),
            "s": format!("0x{}", sig.s),
        }),
        None => json!({}),
    }
}

fn signature_slot(slot: &'static str, raw: RawSignature) -> Result<Option<LightTxSignature>, LightTxError> {
    let malformed = |reason: String| LightTxError::MalformedSignature { slot, reason };
    match (raw.v, raw.r, raw.s) {
        (None, None, None) => Ok(None),
        (Some(v), Some(r), Some(s)) => {
            let v = parse_small_int(&v.as_text()).ok_or_else(|| malformed(format!("bad v '{}'", v.as_text())))?;
            let sig = RecoverableSignature::from_parts(v, &r, &s)
                .map_err(|e| malformed(e.to_string()))?;
            Ok(Some(sig.into()))
        }
        _ => Err(LightTxError::Schema(format!(
            "'{slot}' must be empty or contain exactly r, s and v"
        ))),
    }
}

fn parse_small_int(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn normalize_address(field: &'static str, raw: &str) -> Result<String, LightTxError> {
    let hex = strip_hex_prefix(raw.trim());
    if hex.len() > FIELD_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(LightTxError::InvalidAddress {
            field,
            value: raw.to_string(),
        });
    }
    if hex.is_empty() {
        return Ok(ZERO_ADDRESS.to_string());
    }
    Ok(format!("{:0>width$}", hex.to_ascii_lowercase(), width = FIELD_HEX_LEN))
}

/// Normalize a free-standing address (query paths, CLI input) to its
/// 64-char field form.
pub fn address_field(raw: &str) -> Result<String, LightTxError> {
    normalize_address("address", raw)
}

fn normalize_number(field: &'static str, raw: &str, to_wei: bool) -> Result<String, LightTxError> {
    let text = raw.trim();
    let invalid = |reason: &str| LightTxError::InvalidNumber {
        field,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let hex_form = match text.strip_prefix("0x") {
        Some(rest) if rest.len() == FIELD_HEX_LEN => Some(rest),
        _ if text.len() == FIELD_HEX_LEN => Some(text),
        _ => None,
    };
    if let Some(hex) = hex_form {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("not a hex integer"));
        }
        return Ok(hex.to_ascii_lowercase());
    }

    let scale = if to_wei { WEI_DECIMALS } else { 0 };
    let value = parse_decimal(text, scale).map_err(invalid)?;
    Ok(u256_to_field(&value))
}

/// Exact decimal-to-integer conversion of `text * 10^scale`.
///
/// Accepts an optional fraction and exponent (`1.5`, `2e18`). Rejects
/// signs, non-digits and anything that would leave a fractional
/// remainder.
fn parse_decimal(text: &str, scale: usize) -> Result<U256, &'static str> {
    if text.is_empty() {
        return Err("empty");
    }
    if text.starts_with('-') {
        return Err("negative values are not allowed");
    }
    let text = text.strip_prefix('+').unwrap_or(text);

    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(i) => (
            &text[..i],
            text[i + 1..].parse::<i64>().map_err(|_| "bad exponent")?,
        ),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err("no digits");
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err("not a decimal number");
    }

    let digits = format!("{int_part}{frac_part}");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }

    let shift = exponent
        .checked_add(scale as i64)
        .and_then(|s| s.checked_sub(frac_part.len() as i64))
        .ok_or("exponent out of range")?;

    if shift >= 0 {
        // 10^78 no longer fits; any non-zero digit string overflows.
        if shift > 77 {
            return Err("overflows 256 bits");
        }
        let base = U256::from_dec_str(digits).map_err(|_| "overflows 256 bits")?;
        base.checked_mul(U256::exp10(shift as usize))
            .ok_or("overflows 256 bits")
    } else {
        let drop = shift.unsigned_abs() as usize;
        if drop >= digits.len() {
            return Err("more precision than the unit allows");
        }
        let (keep, dropped) = digits.split_at(digits.len() - drop);
        if dropped.bytes().any(|b| b != b'0') {
            return Err("more precision than the unit allows");
        }
        U256::from_dec_str(keep).map_err(|_| "overflows 256 bits")
    }
}
