//! RLP codec for legacy transaction field lists

use crate::error::{WidgetError, WidgetResult};

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::rlp::{Rlp, RlpStream};
use sha3::{Digest, Keccak256};

/// The six payload fields shared by the signing hash and the wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFields {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: U256,
    /// `None` only for contract creation, which the widget never does
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

/// Payload fields plus the signature triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedFields {
    pub fields: TransactionFields,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

pub fn keccak256(bytes: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(bytes))
}

fn append_payload(stream: &mut RlpStream, fields: &TransactionFields) {
    stream.append(&fields.nonce);
    stream.append(&fields.gas_price);
    stream.append(&fields.gas_limit);
    match fields.to {
        Some(to) => stream.append(&to.as_bytes().to_vec()),
        None => stream.append_empty_data(),
    };
    stream.append(&fields.value);
    stream.append(&fields.data.to_vec());
}

/// Pre-signature encoding
///
/// With a chain id this is the EIP-155 list `[.., chainId, 0, 0]`; chain id 0
/// falls back to the pre-EIP-155 six-field list.
pub fn encode_for_signing(fields: &TransactionFields, chain_id: u64) -> Bytes {
    let mut stream = if chain_id == 0 {
        RlpStream::new_list(6)
    } else {
        RlpStream::new_list(9)
    };
    append_payload(&mut stream, fields);
    if chain_id != 0 {
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
    }
    Bytes::from(stream.out().to_vec())
}

/// Hash the signer commits to
pub fn signing_hash(fields: &TransactionFields, chain_id: u64) -> H256 {
    keccak256(&encode_for_signing(fields, chain_id))
}

/// Wire encoding `[nonce, gasPrice, gasLimit, to, value, data, v, r, s]`
pub fn encode_signed(signed: &SignedFields) -> Bytes {
    let mut stream = RlpStream::new_list(9);
    append_payload(&mut stream, &signed.fields);
    stream.append(&signed.v);
    stream.append(&signed.r);
    stream.append(&signed.s);
    Bytes::from(stream.out().to_vec())
}

/// Inverse of [`encode_signed`]
pub fn decode_signed(raw: &[u8]) -> WidgetResult<SignedFields> {
    let err = |e: ethers::utils::rlp::DecoderError| WidgetError::decode("signed transaction", e);
    let rlp = Rlp::new(raw);

    if !rlp.is_list() {
        return Err(WidgetError::decode("signed transaction", "not an RLP list"));
    }
    let count = rlp.item_count().map_err(err)?;
    if count != 9 {
        return Err(WidgetError::decode(
            "signed transaction",
            format!("expected 9 fields, found {}", count),
        ));
    }

    let to_bytes: Vec<u8> = rlp.val_at(3).map_err(err)?;
    let to = match to_bytes.len() {
        0 => None,
        20 => Some(Address::from_slice(&to_bytes)),
        n => {
            return Err(WidgetError::decode(
                "signed transaction",
                format!("recipient has {} bytes", n),
            ))
        }
    };

    let data: Vec<u8> = rlp.val_at(5).map_err(err)?;

    Ok(SignedFields {
        fields: TransactionFields {
            nonce: rlp.val_at(0).map_err(err)?,
            gas_price: rlp.val_at(1).map_err(err)?,
            gas_limit: rlp.val_at(2).map_err(err)?,
            to,
            value: rlp.val_at(4).map_err(err)?,
            data: Bytes::from(data),
        },
        v: rlp.val_at(6).map_err(err)?,
        r: rlp.val_at(7).map_err(err)?,
        s: rlp.val_at(8).map_err(err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eip155_example() -> TransactionFields {
        TransactionFields {
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: U256::from(21_000u64),
            to: Some(Address::repeat_byte(0x35)),
            value: U256::exp10(18),
            data: Bytes::default(),
        }
    }

    #[test]
    fn test_eip155_signing_payload() {
        let encoded = encode_for_signing(&eip155_example(), 1);
        assert_eq!(
            hex::encode(&encoded),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(signing_hash(&eip155_example(), 1)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_signed_round_trip() {
        let signed = SignedFields {
            fields: TransactionFields {
                data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x01]),
                ..eip155_example()
            },
            v: 37,
            r: U256::from_dec_str(
                "18515461264373351373200002665853028612451056578545711640558177340181847433846",
            )
            .unwrap(),
            s: U256::from_dec_str(
                "46948507304638947509940763649030358759909902576025900602547168820602576006531",
            )
            .unwrap(),
        };

        let raw = encode_signed(&signed);
        assert_eq!(decode_signed(&raw).unwrap(), signed);
    }

    #[test]
    fn test_round_trip_edge_values() {
        let nonces = [0u64, 1, 0x7f, 0x80, u64::MAX];
        let quantities = [U256::zero(), U256::one(), U256::from(0x80u64), U256::MAX];
        let payloads = [Vec::new(), vec![0x00], vec![0x7f], vec![0xab; 55], vec![0xcd; 1024]];
        let recipients = [None, Some(Address::zero()), Some(Address::repeat_byte(0xff))];
        // chain 0, mainnet, and a large chain id
        let vs = [27u64, 28, 37, 38, 35 + 2 * u64::from(u32::MAX), 36 + 2 * u64::from(u32::MAX)];

        for (i, &nonce) in nonces.iter().enumerate() {
            for (j, &quantity) in quantities.iter().enumerate() {
                for (k, payload) in payloads.iter().enumerate() {
                    let signed = SignedFields {
                        fields: TransactionFields {
                            nonce,
                            gas_price: quantity,
                            gas_limit: quantities[(j + 1) % quantities.len()],
                            to: recipients[(i + k) % recipients.len()],
                            value: quantities[(j + k) % quantities.len()],
                            data: Bytes::from(payload.clone()),
                        },
                        v: vs[(i + j + k) % vs.len()],
                        r: quantity,
                        s: quantities[(i + 2) % quantities.len()],
                    };

                    let raw = encode_signed(&signed);
                    assert_eq!(decode_signed(&raw).unwrap(), signed);
                }
            }
        }
    }

    #[test]
    fn test_zero_values_encode_as_empty_strings() {
        let fields = TransactionFields {
            nonce: 0,
            gas_price: U256::zero(),
            gas_limit: U256::zero(),
            to: Some(Address::zero()),
            value: U256::zero(),
            data: Bytes::default(),
        };
        let encoded = encode_for_signing(&fields, 0);
        // list of 6: three empty strings, 20-byte address, two empty strings
        assert_eq!(encoded[0], 0xc0 + 3 + 21 + 2);
        assert_eq!(&encoded[1..4], &[0x80, 0x80, 0x80]);
    }

    #[test]
    fn test_decode_rejects_short_list() {
        let mut stream = RlpStream::new_list(2);
        stream.append(&1u64);
        stream.append(&2u64);
        assert!(decode_signed(&stream.out()).is_err());
        assert!(decode_signed(&[0x80]).is_err());
    }
}
