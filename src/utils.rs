// Bitcoin Dev Kit
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::str::FromStr;

use bitcoin::{OutPoint, Txid};

use crate::error::Error;

/// De-facto standard "dust limit" applied to every output this crate creates
pub const DUST_LIMIT_SATOSHI: u64 = 546;

/// Trait to check if a value is below the dust limit
// we implement this trait to make sure we don't mess up the comparison with off-by-one like a <
// instead of a <= etc.
pub trait IsDust {
    /// Check whether or not a value is below dust limit
    fn is_dust(&self) -> bool;
}

impl IsDust for u64 {
    fn is_dust(&self) -> bool {
        *self < DUST_LIMIT_SATOSHI
    }
}

/// Parse a `txid:vout:offset` sat location
pub fn parse_location(location: &str) -> Result<(OutPoint, u64), Error> {
    let invalid = || Error::InvalidLocation(location.to_string());

    let mut parts = location.split(':');
    let (txid, vout, offset) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(txid), Some(vout), Some(offset), None) => (txid, vout, offset),
        _ => return Err(invalid()),
    };

    let txid = Txid::from_str(txid).map_err(|_| invalid())?;
    let vout = vout.parse::<u32>().map_err(|_| invalid())?;
    let offset = offset.parse::<i64>().map_err(|_| invalid())?;
    if offset < 0 {
        return Err(Error::NegativeSplitOffset(location.to_string()));
    }

    Ok((OutPoint::new(txid, vout), offset as u64))
}

/// Integer fee for `vsize` at `fee_rate` sat/vB
pub(crate) fn fee_for_vsize(vsize: u64, fee_rate: u64) -> u64 {
    vsize.saturating_mul(fee_rate)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    const TXID: &str = "ebd9813ecebc57ff8f30797de7c205e3c7498ca950ea4341ee51a685ff2fa30a";

    #[test]
    fn test_dust_boundary() {
        assert!(545u64.is_dust());
        assert!(!546u64.is_dust());
    }

    #[test]
    fn test_parse_location() {
        let (outpoint, offset) = parse_location(&format!("{}:1:600", TXID)).unwrap();
        assert_eq!(outpoint, OutPoint::from_str(&format!("{}:1", TXID)).unwrap());
        assert_eq!(offset, 600);
    }

    #[test]
    fn test_parse_location_negative_offset() {
        assert_matches!(
            parse_location(&format!("{}:0:-1", TXID)),
            Err(Error::NegativeSplitOffset(_))
        );
    }

    #[test]
    fn test_parse_location_malformed() {
        assert_matches!(
            parse_location(&format!("{}:0", TXID)),
            Err(Error::InvalidLocation(_))
        );
        assert_matches!(
            parse_location(&format!("{}:0:1:2", TXID)),
            Err(Error::InvalidLocation(_))
        );
        assert_matches!(parse_location("nothex:0:1"), Err(Error::InvalidLocation(_)));
    }
}
