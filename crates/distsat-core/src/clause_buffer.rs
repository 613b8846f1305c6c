use std::collections::BTreeMap;

use distsat_common::Checksum;

use crate::error::ClauseBufferError;

/// Below this literal count, a clause's LBD (glue value) always equals its
/// length, so the wire format can omit it entirely for that bucket and
/// recover it as `size` on decode. Above it, LBD is carried explicitly.
/// Matches the partitioning threshold used by the original buffer encoder.
pub const MAX_LBD_PARTITIONED_SIZE: i32 = 5;

/// Largest clause length with its own fixed-position bucket. Longer clauses
/// fall into a single trailing overflow bucket that carries each clause's
/// length explicitly, since the format otherwise fixes one bucket per
/// length so a reader never has to guess where a bucket boundary falls.
pub const MAX_FIXED_BUCKET_SIZE: i32 = 30;

/// Pack a flat int buffer (as produced by [`ClauseBuffer::encode`]) into the
/// little-endian byte payload `Message::GatherClauses`/`DistributeClauses`
/// carry on the wire.
pub fn ints_to_bytes(ints: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ints.len() * 4);
    for &v in ints {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Inverse of [`ints_to_bytes`].
pub fn bytes_to_ints(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// A single learned clause: its literals and LBD (glue) score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Literal ints (DIMACS convention: sign encodes polarity, nonzero variable magnitude).
    pub literals: Vec<i32>,
    /// Literal block distance; lower is more valuable to share.
    pub lbd: i32,
}

impl Clause {
    /// Number of literals in the clause.
    pub fn size(&self) -> i32 {
        self.literals.len() as i32
    }
}

/// A bucket-partitioned collection of clauses ready for the wire, matching
/// §6's variable-length clause buffer encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseBuffer {
    clauses: Vec<Clause>,
}

impl ClauseBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer from already-collected clauses.
    pub fn from_clauses(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Add one clause.
    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Number of clauses carried.
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether the buffer carries no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Total literal-int payload size this buffer would occupy on the wire,
    /// excluding the checksum and bucket-count headers — the quantity the
    /// growth rule in `clause_comm` measures inputs and outputs by.
    pub fn payload_size(&self) -> usize {
        self.clauses
            .iter()
            .map(|c| {
                if c.size() <= MAX_LBD_PARTITIONED_SIZE {
                    c.literals.len()
                } else if c.size() <= MAX_FIXED_BUCKET_SIZE {
                    1 + c.literals.len()
                } else {
                    2 + c.literals.len()
                }
            })
            .sum()
    }

    /// Borrow the clauses.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Consume the buffer, taking ownership of its clauses.
    pub fn into_clauses(self) -> Vec<Clause> {
        self.clauses
    }

    /// Encode to a flat int buffer: `[checksum?] (bucket per size 1..=MAX_FIXED_BUCKET_SIZE) (overflow bucket)`.
    /// Every fixed-size bucket is always emitted, even when empty, so decode
    /// never has to infer a bucket boundary.
    pub fn encode(&self, with_checksum: bool) -> Vec<i32> {
        let mut by_size: BTreeMap<i32, Vec<&Clause>> = BTreeMap::new();
        let mut overflow: Vec<&Clause> = Vec::new();
        for clause in &self.clauses {
            if clause.size() <= MAX_FIXED_BUCKET_SIZE {
                by_size.entry(clause.size()).or_default().push(clause);
            } else {
                overflow.push(clause);
            }
        }

        let mut body = Vec::new();
        for size in 1..=MAX_FIXED_BUCKET_SIZE {
            let bucket = by_size.get(&size).map(Vec::as_slice).unwrap_or(&[]);
            body.push(bucket.len() as i32);
            for clause in bucket {
                if size > MAX_LBD_PARTITIONED_SIZE {
                    body.push(clause.lbd);
                }
                body.extend_from_slice(&clause.literals);
            }
        }

        body.push(overflow.len() as i32);
        for clause in &overflow {
            body.push(clause.size());
            body.push(clause.lbd);
            body.extend_from_slice(&clause.literals);
        }

        if !with_checksum {
            return body;
        }

        let mut checksum = Checksum::new();
        for &value in &body {
            checksum.combine_i32(value);
        }
        let raw = checksum.value();
        let mut out = Vec::with_capacity(body.len() + 2);
        out.push((raw >> 32) as i32);
        out.push(raw as i32);
        out.extend(body);
        out
    }

    /// Decode a flat int buffer produced by [`encode`](Self::encode).
    pub fn decode(ints: &[i32], with_checksum: bool) -> Result<Self, ClauseBufferError> {
        let body = if with_checksum {
            if ints.len() < 2 {
                return Err(ClauseBufferError::TruncatedBucket {
                    size: 0,
                    claimed: 0,
                    remaining: ints.len(),
                });
            }
            let header = ((ints[0] as u32 as u64) << 32) | (ints[1] as u32 as u64);
            let body = &ints[2..];

            let mut checksum = Checksum::new();
            for &value in body {
                checksum.combine_i32(value);
            }
            let computed = checksum.value();
            if computed != header {
                return Err(ClauseBufferError::ChecksumMismatch { header, computed });
            }
            body
        } else {
            ints
        };

        let mut clauses = Vec::new();
        let mut cursor = 0usize;

        for size in 1..=MAX_FIXED_BUCKET_SIZE {
            let num_clauses = read_i32(body, &mut cursor, size)?;
            let has_explicit_lbd = size > MAX_LBD_PARTITIONED_SIZE;
            for _ in 0..num_clauses {
                let lbd = if has_explicit_lbd {
                    read_i32(body, &mut cursor, size)?
                } else {
                    size
                };
                let literals = read_slice(body, &mut cursor, size as usize, size)?;
                clauses.push(Clause { literals, lbd });
            }
        }

        let overflow_count = read_i32(body, &mut cursor, -1)?;
        for _ in 0..overflow_count {
            let size = read_i32(body, &mut cursor, -1)?;
            let lbd = read_i32(body, &mut cursor, -1)?;
            let literals = read_slice(body, &mut cursor, size.max(0) as usize, -1)?;
            clauses.push(Clause { literals, lbd });
        }

        Ok(Self { clauses })
    }
}

fn read_i32(body: &[i32], cursor: &mut usize, bucket_size: i32) -> Result<i32, ClauseBufferError> {
    let value = *body
        .get(*cursor)
        .ok_or_else(|| ClauseBufferError::TruncatedBucket {
            size: bucket_size,
            claimed: 0,
            remaining: body.len() - *cursor,
        })?;
    *cursor += 1;
    Ok(value)
}

fn read_slice(
    body: &[i32],
    cursor: &mut usize,
    len: usize,
    bucket_size: i32,
) -> Result<Vec<i32>, ClauseBufferError> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= body.len())
        .ok_or_else(|| ClauseBufferError::TruncatedBucket {
            size: bucket_size,
            claimed: len as i32,
            remaining: body.len() - *cursor,
        })?;
    let slice = body[*cursor..end].to_vec();
    *cursor = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(literals: &[i32], lbd: i32) -> Clause {
        Clause {
            literals: literals.to_vec(),
            lbd,
        }
    }

    #[test]
    fn round_trips_small_clauses_without_explicit_lbd() {
        let buf = ClauseBuffer::from_clauses(vec![clause(&[1, -2], 2), clause(&[3, 4, -5], 3)]);
        let encoded = buf.encode(false);
        let decoded = ClauseBuffer::decode(&encoded, false).unwrap();
        assert_eq!(decoded.clauses().len(), 2);
        assert!(decoded.clauses().contains(&clause(&[1, -2], 2)));
        assert!(decoded.clauses().contains(&clause(&[3, 4, -5], 3)));
    }

    #[test]
    fn round_trips_fixed_bucket_clauses_with_explicit_lbd() {
        let literals: Vec<i32> = (1..=8).collect();
        let buf = ClauseBuffer::from_clauses(vec![Clause {
            literals: literals.clone(),
            lbd: 4,
        }]);
        let encoded = buf.encode(false);
        let decoded = ClauseBuffer::decode(&encoded, false).unwrap();
        assert_eq!(decoded.clauses()[0].lbd, 4);
        assert_eq!(decoded.clauses()[0].literals, literals);
    }

    #[test]
    fn round_trips_overflow_clauses() {
        let literals: Vec<i32> = (1..=(MAX_FIXED_BUCKET_SIZE + 5)).collect();
        let buf = ClauseBuffer::from_clauses(vec![Clause {
            literals: literals.clone(),
            lbd: 9,
        }]);
        let encoded = buf.encode(true);
        let decoded = ClauseBuffer::decode(&encoded, true).unwrap();
        assert_eq!(decoded.clauses()[0].literals, literals);
        assert_eq!(decoded.clauses()[0].lbd, 9);
    }

    #[test]
    fn mixed_bucket_sizes_round_trip_together() {
        let buf = ClauseBuffer::from_clauses(vec![
            clause(&[1, -2], 2),
            clause(&(1..=10).collect::<Vec<_>>(), 6),
            clause(&(1..=(MAX_FIXED_BUCKET_SIZE + 2)).collect::<Vec<_>>(), 3),
        ]);
        let encoded = buf.encode(true);
        let decoded = ClauseBuffer::decode(&encoded, true).unwrap();
        assert_eq!(decoded.len(), 3);
        for c in buf.clauses() {
            assert!(decoded.clauses().contains(c));
        }
    }

    #[test]
    fn byte_packing_round_trips_negative_literals() {
        let ints = vec![-3, 0, i32::MIN, i32::MAX];
        assert_eq!(bytes_to_ints(&ints_to_bytes(&ints)), ints);
    }

    #[test]
    fn checksum_detects_corruption() {
        let buf = ClauseBuffer::from_clauses(vec![clause(&[1, -2], 2)]);
        let mut encoded = buf.encode(true);
        let last = encoded.len() - 1;
        encoded[last] ^= 1;
        assert!(ClauseBuffer::decode(&encoded, true).is_err());
    }

    #[test]
    fn empty_buffer_round_trips() {
        let buf = ClauseBuffer::new();
        let encoded = buf.encode(true);
        let decoded = ClauseBuffer::decode(&encoded, true).unwrap();
        assert!(decoded.is_empty());
    }
}
