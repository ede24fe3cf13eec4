use alloy::{
    primitives::{Address, B256, Signature, U256, keccak256},
    signers::{self, SignerSync},
};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use super::{NULL_ADDRESS, OrderHash};

/// Intent to trade `maker_token_amount` of maker token for
/// `taker_token_amount` of taker token, settled by the exchange contract.
///
/// Orders are immutable, only the fill/cancel progress tracked on-chain under
/// the order hash changes over time. Amounts are in token base units.
///
/// Serializes into the wire shape shared with relayers: camelCase keys,
/// amounts as decimal strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub maker: Address,
    /// [`NULL_ADDRESS`] if anyone can fill the order.
    pub taker: Address,
    pub maker_token_address: Address,
    pub taker_token_address: Address,
    /// [`NULL_ADDRESS`] if no fees are paid.
    pub fee_recipient: Address,
    pub exchange_contract_address: Address,
    #[serde(with = "decimal")]
    pub maker_token_amount: U256,
    #[serde(with = "decimal")]
    pub taker_token_amount: U256,
    #[serde(with = "decimal")]
    pub maker_fee: U256,
    #[serde(with = "decimal")]
    pub taker_fee: U256,
    #[serde(with = "decimal")]
    pub expiration_unix_timestamp_sec: U256,
    #[serde(with = "decimal")]
    pub salt: U256,
}

impl Order {
    /// Hash the exchange contract computes for the order, tightly packed
    /// in the contract's field order.
    pub fn hash(&self) -> OrderHash {
        keccak256(
            (
                self.exchange_contract_address,
                self.maker,
                self.taker,
                self.maker_token_address,
                self.taker_token_address,
                self.fee_recipient,
                self.maker_token_amount,
                self.taker_token_amount,
                self.maker_fee,
                self.taker_fee,
                self.expiration_unix_timestamp_sec,
                self.salt,
            )
                .abi_encode_packed(),
        )
    }

    /// Indicates if anyone can fill the order.
    pub fn is_open(&self) -> bool {
        self.taker == NULL_ADDRESS
    }

    /// Indicates if the order is expired at the given unix timestamp.
    pub fn is_expired_at(&self, now_sec: u64) -> bool {
        U256::from(now_sec) >= self.expiration_unix_timestamp_sec
    }

    /// Expiration in unix milliseconds, saturated to `u64`.
    pub fn expiration_ms(&self) -> u64 {
        u64::try_from(self.expiration_unix_timestamp_sec)
            .unwrap_or(u64::MAX)
            .saturating_mul(1000)
    }
}

/// ECDSA signature in `{v, r, s}` form with `v` in `{27, 28}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ECSignature {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

impl ECSignature {
    /// Recovers the address that signed the personal-message digest of the
    /// order hash, `None` if the signature is malformed.
    pub fn recover(&self, order_hash: OrderHash) -> Option<Address> {
        let y_parity = match self.v {
            27 => false,
            28 => true,
            _ => return None,
        };
        Signature::new(
            U256::from_be_bytes(self.r.0),
            U256::from_be_bytes(self.s.0),
            y_parity,
        )
        .recover_address_from_msg(order_hash.as_slice())
        .ok()
    }

    /// Indicates if `signer` produced this signature over the order hash.
    pub fn is_valid(&self, order_hash: OrderHash, signer: Address) -> bool {
        self.recover(order_hash) == Some(signer)
    }
}

impl From<Signature> for ECSignature {
    fn from(value: Signature) -> Self {
        Self {
            v: 27 + value.v() as u8,
            r: B256::from(value.r().to_be_bytes::<32>()),
            s: B256::from(value.s().to_be_bytes::<32>()),
        }
    }
}

/// Order along with the maker's signature over its hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    #[serde(flatten)]
    pub order: Order,
    pub ec_signature: ECSignature,
}

impl SignedOrder {
    /// Signs the order hash as a personal message.
    ///
    /// The signer is expected to be the order maker, it is not checked here.
    pub fn sign<S: SignerSync>(order: Order, signer: &S) -> Result<Self, signers::Error> {
        let signature = signer.sign_message_sync(order.hash().as_slice())?;
        Ok(Self {
            order,
            ec_signature: signature.into(),
        })
    }

    pub fn hash(&self) -> OrderHash {
        self.order.hash()
    }

    /// Indicates if the signature was produced by the order maker.
    pub fn is_valid_signature(&self) -> bool {
        self.ec_signature.is_valid(self.hash(), self.order.maker)
    }
}

impl std::ops::Deref for SignedOrder {
    type Target = Order;

    fn deref(&self) -> &Order {
        &self.order
    }
}

/// Big integers as decimal strings, `0x` hex accepted on input.
mod decimal {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<U256>().map_err(D::Error::custom)
    }
}
