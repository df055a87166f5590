//! Weighted random credential selection

use rand::Rng;

/// Anything with a relative selection weight
pub trait Weighted {
    fn weight(&self) -> u32;
}

impl<S> Weighted for switchboard_config::Credential<S> {
    fn weight(&self) -> u32 {
        self.weight
    }
}

/// Why no candidate could be picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    NoCandidates,
    ZeroTotalWeight,
}

/// Pick the index of one candidate, proportionally to its weight
///
/// A lone candidate is returned without drawing from `rng`, whatever its
/// weight. Otherwise a single uniform draw in `[0, total)` is walked against
/// the cumulative weights, so zero-weight candidates are never picked.
pub fn select_index<T, R>(candidates: &[T], rng: &mut R) -> Result<usize, SelectError>
where
    T: Weighted,
    R: Rng,
{
    match candidates {
        [] => return Err(SelectError::NoCandidates),
        [_] => return Ok(0),
        _ => {}
    }

    let total: u64 = candidates.iter().map(|c| u64::from(c.weight())).sum();
    if total == 0 {
        return Err(SelectError::ZeroTotalWeight);
    }

    let draw = rng.random_range(0..total);
    let mut cumulative = 0u64;

    for (index, candidate) in candidates.iter().enumerate() {
        cumulative += u64::from(candidate.weight());
        if draw < cumulative {
            return Ok(index);
        }
    }

    // Unreachable while draw < total
    Ok(candidates.len() - 1)
}
