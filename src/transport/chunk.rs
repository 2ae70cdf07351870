use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use log::trace;

use crate::error::Error;
use crate::proto::constants::*;

/// Command byte carried by the first fragment of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Ping,
    KeepAlive,
    Message,
    Error,
}

impl CommandType {
    pub fn byte(self) -> u8 {
        match self {
            CommandType::Ping => CMD_PING,
            CommandType::KeepAlive => CMD_KEEPALIVE,
            CommandType::Message => CMD_MSG,
            CommandType::Error => CMD_ERROR,
        }
    }

    pub fn from_byte(byte: u8) -> Option<CommandType> {
        match byte {
            CMD_PING => Some(CommandType::Ping),
            CMD_KEEPALIVE => Some(CommandType::KeepAlive),
            CMD_MSG => Some(CommandType::Message),
            CMD_ERROR => Some(CommandType::Error),
            _ => None,
        }
    }
}

/// Role of a single received fragment, derived from its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Ping,
    KeepAlive,
    Message,
    Error,
    Continuation,
    Unknown,
}

pub fn classify(fragment: &[u8]) -> ChunkType {
    let byte = match fragment.first() {
        Some(byte) => *byte,
        None => return ChunkType::Unknown,
    };

    if byte & TYPE_MASK == 0 {
        return ChunkType::Continuation;
    }

    match CommandType::from_byte(byte) {
        Some(CommandType::Ping) => ChunkType::Ping,
        Some(CommandType::KeepAlive) => ChunkType::KeepAlive,
        Some(CommandType::Message) => ChunkType::Message,
        Some(CommandType::Error) => ChunkType::Error,
        None => ChunkType::Unknown,
    }
}

/// Splits `payload` into transport fragments of at most `chunk_size` bytes.
///
/// The first fragment is `[command][total length:be16][payload...]`, every
/// following fragment is `[sequence][payload...]` with the sequence starting
/// at 0. Sequence numbers wrap modulo 256, matching what [`join`] expects.
pub fn split(payload: &[u8], command: CommandType, chunk_size: usize) -> Result<Vec<Vec<u8>>, Error> {
    if chunk_size < MIN_CHUNK_SIZE {
        return Err(Error::InvalidChunkSize(chunk_size));
    }

    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let total = payload.len();
    let mut chunks = Vec::new();

    let first_len = total.min(chunk_size - INIT_HEADER_SIZE);
    let mut first = Vec::with_capacity(INIT_HEADER_SIZE + first_len);
    first.push(command.byte());
    first.extend_from_slice(&(total as u16).to_be_bytes());
    first.extend_from_slice(&payload[..first_len]);
    chunks.push(first);

    let mut offset = first_len;
    let mut sequence: u8 = 0;

    while offset < total {
        let len = (total - offset).min(chunk_size - CONT_HEADER_SIZE);
        let mut chunk = Vec::with_capacity(CONT_HEADER_SIZE + len);
        chunk.push(sequence);
        chunk.extend_from_slice(&payload[offset..offset + len]);
        chunks.push(chunk);
        offset += len;
        sequence = sequence.wrapping_add(1);
    }

    trace!("split {} byte payload into {} fragment(s)", total, chunks.len());

    Ok(chunks)
}

/// Reassembles fragments, in arrival order, into the original payload.
///
/// One-shot reconstruction: the whole fragment set is walked every time. The
/// first fragment must carry `command` and the declared total length must be
/// consumed exactly; continuation sequence numbers must ascend from 0
/// (modulo 256).
pub fn join(fragments: &[Vec<u8>], command: CommandType) -> Result<Vec<u8>, Error> {
    if fragments.is_empty() {
        return Err(Error::EmptyPayload);
    }

    let mut payload = Vec::new();
    let mut remaining: i64 = 0;
    let mut expected_sequence: u8 = 0;
    let mut first = true;

    for fragment in fragments {
        let mut reader = Cursor::new(fragment.as_slice());

        if first {
            let cmd = reader.read_u8()?;
            if cmd != command.byte() {
                return Err(Error::UnexpectedCommand {
                    expected: command.byte(),
                    got: cmd,
                });
            }

            remaining = i64::from(reader.read_u16::<BigEndian>()?);

            let body = &fragment[INIT_HEADER_SIZE..];
            payload.extend_from_slice(body);
            remaining -= body.len() as i64;
            first = false;
        } else {
            let sequence = reader.read_u8()?;
            if sequence != expected_sequence {
                return Err(Error::SequenceError {
                    expected: expected_sequence,
                    got: sequence,
                });
            }

            let body = &fragment[CONT_HEADER_SIZE..];
            payload.extend_from_slice(body);
            remaining -= body.len() as i64;
            expected_sequence = expected_sequence.wrapping_add(1);
        }
    }

    if remaining != 0 {
        return Err(Error::LengthMismatch { remaining });
    }

    trace!("joined {} fragment(s) into {} byte payload", fragments.len(), payload.len());

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn split_single_fragment() {
        let chunks = split(&[0xAA, 0xBB, 0xCC], CommandType::Message, 20).unwrap();
        assert_eq!(chunks, vec![vec![0x83, 0x00, 0x03, 0xAA, 0xBB, 0xCC]]);
    }

    #[test]
    fn split_emits_incrementing_sequences() {
        let payload = [0x42u8; 20];
        let chunks = split(&payload, CommandType::Message, 8).unwrap();

        // 5 bytes in the first fragment, 7 per continuation
        assert_eq!(chunks.len(), 4);
        assert_eq!(&chunks[0][..3], &[0x83, 0x00, 0x14]);
        assert_eq!(chunks[1][0], 0);
        assert_eq!(chunks[2][0], 1);
        assert_eq!(chunks[3][0], 2);
        assert_eq!(chunks[3].len(), 2);
    }

    #[test]
    fn split_rejects_bad_inputs() {
        assert_eq!(split(&[], CommandType::Message, 20), Err(Error::EmptyPayload));
        assert_eq!(split(&[1], CommandType::Message, 7), Err(Error::InvalidChunkSize(7)));

        let oversize = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            split(&oversize, CommandType::Message, 20),
            Err(Error::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1))
        );
    }

    #[test]
    fn round_trip_random_payloads() {
        let mut rng = rand::rng();

        for (len, chunk_size) in [(1usize, 8usize), (5, 8), (6, 8), (247, 20), (1024, 57), (65535, 509)] {
            let mut payload = vec![0u8; len];
            rng.fill_bytes(&mut payload);

            let chunks = split(&payload, CommandType::Message, chunk_size).unwrap();
            assert_eq!(join(&chunks, CommandType::Message).unwrap(), payload);
        }
    }

    #[test]
    fn round_trip_wraps_sequence_past_255() {
        // chunk size 8 carries 5 + 7n bytes, so this needs 300 continuations
        let payload = vec![0x5Au8; 5 + 7 * 300];
        let chunks = split(&payload, CommandType::Message, 8).unwrap();

        assert_eq!(chunks.len(), 301);
        assert_eq!(chunks[256][0], 255);
        assert_eq!(chunks[257][0], 0);
        assert_eq!(join(&chunks, CommandType::Message).unwrap(), payload);
    }

    #[test]
    fn join_rejects_wrong_command() {
        let chunks = split(&[1, 2, 3], CommandType::Ping, 20).unwrap();
        assert_eq!(
            join(&chunks, CommandType::Message),
            Err(Error::UnexpectedCommand { expected: 0x83, got: 0x81 })
        );
    }

    #[test]
    fn join_rejects_sequence_gap() {
        let payload = [0u8; 20];
        let mut chunks = split(&payload, CommandType::Message, 8).unwrap();
        chunks.remove(2);

        assert_eq!(
            join(&chunks, CommandType::Message),
            Err(Error::SequenceError { expected: 1, got: 2 })
        );
    }

    #[test]
    fn join_rejects_sequence_reset() {
        let payload = [0u8; 20];
        let mut chunks = split(&payload, CommandType::Message, 8).unwrap();
        chunks[2][0] = 0;

        assert_eq!(
            join(&chunks, CommandType::Message),
            Err(Error::SequenceError { expected: 1, got: 0 })
        );
    }

    #[test]
    fn join_reports_missing_bytes() {
        let chunks = vec![vec![0x83, 0x00, 0x0A, 1, 2, 3]];
        assert_eq!(
            join(&chunks, CommandType::Message),
            Err(Error::LengthMismatch { remaining: 7 })
        );
    }

    #[test]
    fn join_reports_overflow() {
        // declares 10 bytes but delivers 12
        let chunks = vec![
            vec![0x83, 0x00, 0x0A, 1, 2, 3, 4, 5, 6],
            vec![0x00, 7, 8, 9, 10, 11, 12],
        ];
        assert_eq!(
            join(&chunks, CommandType::Message),
            Err(Error::LengthMismatch { remaining: -2 })
        );
    }

    #[test]
    fn classify_inspects_leading_byte() {
        assert_eq!(classify(&[0x81, 0x00]), ChunkType::Ping);
        assert_eq!(classify(&[0x82]), ChunkType::KeepAlive);
        assert_eq!(classify(&[0x83, 0x00, 0x01, 0xFF]), ChunkType::Message);
        assert_eq!(classify(&[0xBF]), ChunkType::Error);
        assert_eq!(classify(&[0x00, 0xAA]), ChunkType::Continuation);
        assert_eq!(classify(&[0x7F]), ChunkType::Continuation);
        assert_eq!(classify(&[0x84]), ChunkType::Unknown);
        assert_eq!(classify(&[]), ChunkType::Unknown);
    }
}
