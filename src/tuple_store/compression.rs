// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-attribute value compression: dictionary coding or integer truncation.
//!
//! Grounded on `storage/CompressedColumnStoreTupleStorageSubBlock.{hpp,cpp}`'s
//! `compression_info_`/`CompressedAttrDictionary` machinery, simplified to
//! two coding schemes chosen per attribute from a sample of the tuples
//! being loaded: dictionary coding (any comparable type) and truncation to
//! a smaller fixed-width integer code (`Int` attributes only, when the
//! value domain is narrow enough that it beats a dictionary).

use crate::binary_search::partition_point;
use crate::value::Value;
use std::cmp::Ordering;

/// How a single attribute's values are translated to fixed-width codes.
#[derive(Clone, Debug)]
pub enum Coding {
    /// Stored at natural width, uncoded.
    None { width: usize },
    /// `code = value - min_value`, stored in `code_width` bytes. `domain`
    /// is the number of distinct values the sample actually spans
    /// (`max - min + 1`), used as the exclusive upper code bound for
    /// `Ge`/`Gt` range translation.
    Truncated { code_width: usize, min_value: i64, domain: u64 },
    /// `code` indexes a sorted, deduplicated dictionary of observed values.
    Dictionary { code_width: usize, dict: Vec<Value> },
}

impl Coding {
    /// The fixed byte width a code under this scheme occupies.
    #[must_use]
    pub fn code_width(&self) -> usize {
        match self {
            Self::None { width } => *width,
            Self::Truncated { code_width, .. } | Self::Dictionary { code_width, .. } => *code_width,
        }
    }

    /// Encodes `value` to its code, as a big-endian integer in the low bytes
    /// of the returned `u64`.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not representable under this coding — callers
    /// must build the coding from a domain sample that covers every value
    /// they will ever encode (see [`build`]).
    #[must_use]
    pub fn encode(&self, value: &Value) -> u64 {
        match self {
            Self::None { .. } => unreachable!("uncoded attributes bypass Coding::encode"),
            Self::Truncated { min_value, .. } => {
                let Value::Int(i) = value else { panic!("Truncated coding requires Int values") };
                (i - min_value) as u64
            }
            Self::Dictionary { dict, .. } => {
                let idx = dict
                    .binary_search_by(|v| v.compare(value))
                    .unwrap_or_else(|_| panic!("value not present in dictionary built from this store's own data"));
                idx as u64
            }
        }
    }

    /// Decodes `code` back to the original value. `ty` disambiguates the
    /// result type for [`Self::Truncated`], which only ever holds `Int`.
    #[must_use]
    pub fn decode(&self, code: u64) -> Value {
        match self {
            Self::None { .. } => unreachable!("uncoded attributes bypass Coding::decode"),
            Self::Truncated { min_value, .. } => Value::Int(min_value + code as i64),
            Self::Dictionary { dict, .. } => dict[code as usize].clone(),
        }
    }

    /// Writes `code` into `out` as a big-endian integer of `code_width()` bytes.
    pub fn write_code(&self, code: u64, out: &mut [u8]) {
        let width = self.code_width();
        let bytes = code.to_be_bytes();
        out.copy_from_slice(&bytes[8 - width..]);
    }

    /// Reads a code of `code_width()` bytes back out of `bytes`.
    #[must_use]
    pub fn read_code(&self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        u64::from_be_bytes(buf)
    }

    pub(crate) fn lower_bound_code(&self, value: &Value) -> u64 {
        match self {
            Self::None { .. } => unreachable!(),
            Self::Truncated { min_value, domain, .. } => {
                let Value::Int(i) = value else { panic!("Truncated coding requires Int values") };
                if i <= min_value {
                    0
                } else {
                    ((i - min_value) as u64).min(*domain)
                }
            }
            Self::Dictionary { dict, .. } => {
                partition_point(dict.len(), |i| dict[i].compare(value) == Ordering::Less) as u64
            }
        }
    }

    pub(crate) fn upper_bound_code(&self, value: &Value) -> u64 {
        match self {
            Self::None { .. } => unreachable!(),
            Self::Truncated { min_value, domain, .. } => {
                let Value::Int(i) = value else { panic!("Truncated coding requires Int values") };
                if i < min_value {
                    0
                } else {
                    ((i - min_value) as u64 + 1).min(*domain)
                }
            }
            Self::Dictionary { dict, .. } => {
                partition_point(dict.len(), |i| dict[i].compare(value) != Ordering::Greater) as u64
            }
        }
    }

    fn domain_size(&self) -> u64 {
        match self {
            Self::None { .. } => unreachable!(),
            Self::Truncated { domain, .. } => *domain,
            Self::Dictionary { dict, .. } => dict.len() as u64,
        }
    }

    /// Whether `value` lies within the domain this coding can represent
    /// exactly (vs. having been built from a sample that didn't include it).
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        match self {
            Self::None { .. } => true,
            Self::Truncated { min_value, domain, .. } => {
                let Value::Int(i) = value else { return false };
                *i >= *min_value && ((i - min_value) as u64) < *domain
            }
            Self::Dictionary { dict, .. } => dict.binary_search_by(|v| v.compare(value)).is_ok(),
        }
    }
}

/// How a code-domain range predicate resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeQuery {
    /// Every tuple matches.
    All,
    /// No tuple matches.
    None,
    /// Tuples whose code is in `[lo, hi)` match.
    Range { lo: u64, hi: u64 },
    /// Tuples whose code is *not* `excluded` match.
    NotEqual { excluded: u64 },
}

impl Coding {
    /// Translates `op value` into a [`CodeQuery`] over this coding's domain.
    #[must_use]
    pub fn translate(&self, op: crate::predicate::ComparisonOp, value: &Value) -> CodeQuery {
        use crate::predicate::ComparisonOp::{Eq, Ge, Gt, Le, Lt, Ne};

        let domain = self.domain_size();
        match op {
            Eq => {
                if !self.contains(value) {
                    CodeQuery::None
                } else {
                    CodeQuery::Range {
                        lo: self.lower_bound_code(value),
                        hi: self.upper_bound_code(value),
                    }
                }
            }
            Ne => {
                if !self.contains(value) {
                    CodeQuery::All
                } else {
                    CodeQuery::NotEqual {
                        excluded: self.lower_bound_code(value),
                    }
                }
            }
            Lt => CodeQuery::Range { lo: 0, hi: self.lower_bound_code(value) },
            Le => CodeQuery::Range { lo: 0, hi: self.upper_bound_code(value) },
            Gt => CodeQuery::Range { lo: self.upper_bound_code(value), hi: domain },
            Ge => CodeQuery::Range { lo: self.lower_bound_code(value), hi: domain },
        }
    }
}

/// Builds a [`Coding`] for one attribute from a sample of observed values
/// (typically every tuple loaded so far). `int_allows_truncation` enables
/// the truncation scheme for `Int` attributes.
#[must_use]
pub fn build(samples: &[Value]) -> Coding {
    let natural_width = samples.first().map_or(8, Value::byte_len).max(1);

    let mut dict: Vec<Value> = samples.to_vec();
    dict.sort_by(Value::compare);
    dict.dedup_by(|a, b| a.compare(b) == Ordering::Equal);
    let dict_code_width = code_width_for(dict.len() as u64);

    if let Some(Value::Int(_)) = samples.first() {
        let ints: Vec<i64> = samples
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                _ => unreachable!("mixed types within one attribute column"),
            })
            .collect();
        let min = *ints.iter().min().unwrap_or(&0);
        let max = *ints.iter().max().unwrap_or(&0);
        let span = (max - min) as u64 + 1;
        let truncated_code_width = code_width_for(span);

        if truncated_code_width <= dict_code_width {
            return Coding::Truncated {
                code_width: truncated_code_width,
                min_value: min,
                domain: span,
            };
        }
    }

    if dict_code_width >= natural_width {
        return Coding::None { width: natural_width };
    }
    Coding::Dictionary {
        code_width: dict_code_width,
        dict,
    }
}

fn code_width_for(domain_size: u64) -> usize {
    if domain_size <= 1 << 8 {
        1
    } else if domain_size <= 1 << 16 {
        2
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::ComparisonOp;

    #[test]
    fn truncation_preferred_for_narrow_int_domain() {
        let samples: Vec<Value> = (0..5).map(Value::Int).collect();
        let coding = build(&samples);
        assert!(matches!(coding, Coding::Truncated { code_width: 1, min_value: 0, domain: 5 }));
    }

    #[test]
    fn dictionary_round_trips() {
        let samples = vec![
            Value::Char(b"bbbb".to_vec()),
            Value::Char(b"aaaa".to_vec()),
            Value::Char(b"cccc".to_vec()),
        ];
        let coding = build(&samples);
        let code = coding.encode(&Value::Char(b"bbbb".to_vec()));
        assert_eq!(coding.decode(code), Value::Char(b"bbbb".to_vec()));
    }

    #[test]
    fn eq_on_missing_value_is_none() {
        let samples: Vec<Value> = (0..5).map(Value::Int).collect();
        let coding = build(&samples);
        let q = coding.translate(ComparisonOp::Eq, &Value::Int(100));
        assert_eq!(q, CodeQuery::None);
    }

    #[test]
    fn range_translates_to_code_bounds() {
        let samples: Vec<Value> = (0..10).map(Value::Int).collect();
        let coding = build(&samples);
        let q = coding.translate(ComparisonOp::Ge, &Value::Int(5));
        assert_eq!(q, CodeQuery::Range { lo: 5, hi: 10 });
    }
}
