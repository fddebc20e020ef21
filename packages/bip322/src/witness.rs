//! Conversion between the BIP-322 "simple signature" encoding and a witness
//! stack. A simple signature is a witness stack, consensus encoded as a
//! vector of vectors of bytes.

use crate::error::Error;
use crate::Result;

use bitcoin::Witness;

/// Maximum number of witness items to read for the witness data of a single
/// input. Bounded by the maximum transaction weight divided by a lower bound
/// of two bytes per encoded item
const MAX_WITNESS_ITEMS_PER_INPUT: usize = 4_000_000;

/// Maximum allowed size for an item within an input's witness data. Bounded
/// by the largest possible block size post segwit v1 (taproot)
const MAX_WITNESS_ITEM_SIZE: usize = 4_000_000;

/// read_varint reads a canonical Bitcoin variable-length integer from `data`
/// at `pos`, advancing it
fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let discriminant = *data
        .get(*pos)
        .ok_or_else(|| Error::MalformedWitness("unexpected end of data".to_string()))?;
    *pos += 1;

    let (value, min) = match discriminant {
        0xff => {
            let bytes: [u8; 8] = read_bytes(data, pos)?;
            (u64::from_le_bytes(bytes), 0x100000000)
        }
        0xfe => {
            let bytes: [u8; 4] = read_bytes(data, pos)?;
            (u64::from(u32::from_le_bytes(bytes)), 0x10000)
        }
        0xfd => {
            let bytes: [u8; 2] = read_bytes(data, pos)?;
            (u64::from(u16::from_le_bytes(bytes)), 0xfd)
        }
        value => (u64::from(value), 0),
    };
    // Reject non-canonical encodings
    if value < min {
        return Err(Error::MalformedWitness(format!(
            "non-canonical varint {value}"
        )));
    }
    Ok(value)
}

fn read_bytes<const N: usize>(data: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let end = *pos + N;
    let slice = data
        .get(*pos..end)
        .ok_or_else(|| Error::MalformedWitness("unexpected end of data".to_string()))?;
    *pos = end;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(slice);
    Ok(bytes)
}

/// simple_sig_to_witness decodes a simple signature into a witness stack:
/// a varint item count, then for each item a varint length prefix followed
/// by the item bytes. Item count and sizes are capped to protect against
/// memory exhaustion through malformed signatures
pub fn simple_sig_to_witness(sig: &[u8]) -> Result<Witness> {
    let mut pos = 0usize;

    let item_count = read_varint(sig, &mut pos)? as usize;
    if item_count > MAX_WITNESS_ITEMS_PER_INPUT {
        return Err(Error::TooManyWitnessItems(
            item_count,
            MAX_WITNESS_ITEMS_PER_INPUT,
        ));
    }

    let mut stack: Vec<Vec<u8>> = Vec::with_capacity(item_count.min(16));
    for _ in 0..item_count {
        let item_size = read_varint(sig, &mut pos)? as usize;
        if item_size > MAX_WITNESS_ITEM_SIZE {
            return Err(Error::WitnessItemTooLarge(item_size, MAX_WITNESS_ITEM_SIZE));
        }
        let end = pos + item_size;
        let item = sig
            .get(pos..end)
            .ok_or_else(|| Error::MalformedWitness("unexpected end of data".to_string()))?;
        pos = end;
        stack.push(item.to_vec());
    }
    if pos != sig.len() {
        return Err(Error::MalformedWitness("trailing bytes".to_string()));
    }

    Ok(Witness::from_slice(&stack))
}

fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// serialize_witness encodes a witness stack into the simple signature format
pub fn serialize_witness(witness: &Witness) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, witness.len() as u64);
    for item in witness.iter() {
        write_varint(&mut buf, item.len() as u64);
        buf.extend_from_slice(item);
    }
    buf
}
