//! Event envelope construction and validation, and the genesis miniblock.

use parity_scale_codec::{Decode, Encode};
use primitive_types::H256;
use towns_core::protocol::{Envelope, Miniblock, MiniblockHeader, ParsedEvent, StreamEvent};
use towns_core::{Err, Result, RiverError};
use towns_crypto::{public_key_to_address, recover_signer_public_key, TownsHash, Wallet};

/// Signs `event` with `wallet` and wraps it in a wire envelope. The hash is
/// the events-domain hash of the canonical SCALE bytes.
pub fn make_envelope(wallet: &Wallet, event: &StreamEvent) -> Result<Envelope> {
    let bytes = event.encode();
    let hash = TownsHash::EVENTS.hash(&bytes);
    let signature = wallet.sign_hash(hash)?;
    Ok(Envelope { event: bytes, signature: signature.to_vec(), hash })
}

/// Validates an envelope: recomputes the events-domain hash and recovers the
/// signer, which must equal the event's creator address.
pub fn parse_event(envelope: &Envelope) -> Result<ParsedEvent> {
    let event = StreamEvent::decode(&mut envelope.event.as_slice()).map_err(|err| {
        RiverError::with_base(Err::InvalidArgument, "failed to decode stream event", err)
            .func("parse_event")
    })?;
    let hash = TownsHash::EVENTS.hash(&envelope.event);
    if hash != envelope.hash {
        return Err(RiverError::new(Err::InvalidArgument, "event hash mismatch")
            .tag("expected", hash)
            .tag("actual", envelope.hash)
            .func("parse_event"));
    }
    let public_key = recover_signer_public_key(hash, &envelope.signature)?;
    let signer = public_key_to_address(&public_key);
    if signer != event.creator_address {
        return Err(RiverError::new(Err::InvalidArgument, "event signature does not match creator")
            .tag("creatorAddress", towns_crypto::checksum_hex(event.creator_address))
            .tag("signer", towns_crypto::checksum_hex(signer))
            .func("parse_event"));
    }
    Ok(ParsedEvent { event, envelope: envelope.clone(), hash })
}

pub fn parse_events(envelopes: &[Envelope]) -> Result<Vec<ParsedEvent>> {
    envelopes.iter().map(parse_event).collect()
}

/// Builds the signed genesis miniblock for a new stream: sequence 0, zero
/// parent hash, the parsed events in request order.
pub fn make_genesis_miniblock(
    wallet: &Wallet,
    parsed_events: &[ParsedEvent],
    timestamp_epoch_ms: u64,
) -> Result<Miniblock> {
    let header = MiniblockHeader {
        sequence_number: 0,
        prev_miniblock_hash: H256::zero(),
        timestamp_epoch_ms,
        event_hashes: parsed_events.iter().map(|event| event.hash).collect(),
    };
    let hash = TownsHash::EVENTS.hash(&header.encode());
    let signature = wallet.sign_hash(hash)?;
    Ok(Miniblock {
        header,
        hash,
        signature: signature.to_vec(),
        events: parsed_events.iter().map(|event| event.envelope.clone()).collect(),
    })
}
