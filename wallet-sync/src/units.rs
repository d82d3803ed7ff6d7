//! Conversion between atoms and coins.

use crate::error::AmountError;

/// Atoms in one coin.
pub const ATOMS_PER_COIN: i64 = 100_000_000;

/// Convert an atom amount to coins.
pub fn amount_coin(atoms: i64) -> f64 {
    atoms as f64 / ATOMS_PER_COIN as f64
}

/// Convert a coin amount to atoms, rounding to the nearest atom.
///
/// Non-finite input and amounts that do not fit in an `i64` are rejected
/// instead of being mapped to a sentinel value.
pub fn amount_atom(coins: f64) -> Result<i64, AmountError> {
    let result = to_atoms(coins);
    if let Err(e) = &result {
        tracing::error!("{}", e);
    }
    result
}

fn to_atoms(coins: f64) -> Result<i64, AmountError> {
    if !coins.is_finite() {
        return Err(AmountError::NotFinite(coins));
    }

    // f64::round rounds half away from zero
    let atoms = (coins * ATOMS_PER_COIN as f64).round();
    if atoms < i64::MIN as f64 || atoms >= i64::MAX as f64 {
        return Err(AmountError::OutOfRange(coins));
    }
    Ok(atoms as i64)
}
