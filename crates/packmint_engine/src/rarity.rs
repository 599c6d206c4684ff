//! # Rarity Tiers and Threshold Tables
//!
//! **Data-driven tier resolution in basis points**
//!
//! A roll is `value mod 10000`. A [`TierTable`] is walked from the rarest row
//! to the most common one; the first row whose threshold the roll reaches
//! wins, and a roll that reaches none resolves to COMMON.
//!
//! ```text
//! lucky slot:  SERIALIZED >= 9500 | MYTHICAL >= 7500 | RARE >= 3500 | UNCOMMON >= 1000 | COMMON
//! other slots: UNCOMMON >= 7000 | COMMON
//! ```
//!
//! Only the lucky table may name scarce tiers. That bounds scarce draws to one
//! attempt per bundle.

use serde::{Deserialize, Serialize};

use crate::error::{DistributionError, DistributionResult};

/// Roll precision: 10000 = 100%.
pub const ROLL_PRECISION_BP: u16 = 10_000;

/// Rarity tier for catalog items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Rarity {
    /// The floor of every fallback chain. Always non-empty and unbounded.
    Common = 0,
    /// Common filler, second most frequent.
    Uncommon = 1,
    /// Rare cards, lucky slot only.
    Rare = 2,
    /// Mythical cards, lucky slot only.
    Mythical = 3,
    /// Numbered cards with a hard issuance cap.
    Serialized = 4,
}

impl Rarity {
    /// Every tier, most common first.
    pub const ALL: [Self; 5] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Mythical,
        Self::Serialized,
    ];

    /// Number of tiers.
    pub const COUNT: usize = 5;

    /// Converts from u8, or `None` for an unknown tier.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Common),
            1 => Some(Self::Uncommon),
            2 => Some(Self::Rare),
            3 => Some(Self::Mythical),
            4 => Some(Self::Serialized),
            _ => None,
        }
    }

    /// Position of this tier in [`Rarity::ALL`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Common => "Common",
            Self::Uncommon => "Uncommon",
            Self::Rare => "Rare",
            Self::Mythical => "Mythical",
            Self::Serialized => "Serialized",
        }
    }

    /// Tiers that non-lucky slots are never allowed to produce directly.
    #[inline]
    #[must_use]
    pub const fn is_scarce(self) -> bool {
        self as u8 >= Self::Rare as u8
    }

    /// The next more common tier, or `None` at COMMON.
    #[inline]
    #[must_use]
    pub const fn more_common(self) -> Option<Self> {
        match self {
            Self::Common => None,
            Self::Uncommon => Some(Self::Common),
            Self::Rare => Some(Self::Uncommon),
            Self::Mythical => Some(Self::Rare),
            Self::Serialized => Some(Self::Mythical),
        }
    }

    /// This tier followed by every more common tier, down to COMMON.
    pub fn fallback_chain(self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self), |tier| tier.more_common())
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduces a random value to a basis-point roll in `0..10000`.
#[inline]
#[must_use]
pub fn roll_bp(value: u128) -> u16 {
    // The remainder is always below 10000.
    (value % u128::from(ROLL_PRECISION_BP)) as u16
}

/// One row of a threshold table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThreshold {
    /// Tier selected when the roll reaches `min_roll_bp`.
    pub tier: Rarity,
    /// Lowest roll (inclusive) that selects `tier`.
    pub min_roll_bp: u16,
}

impl TierThreshold {
    /// Creates a threshold row.
    #[inline]
    #[must_use]
    pub const fn new(tier: Rarity, min_roll_bp: u16) -> Self {
        Self { tier, min_roll_bp }
    }
}

/// Ordered threshold table, rarest row first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierTable {
    rows: Vec<TierThreshold>,
}

impl TierTable {
    /// Builds a table after checking it is well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidTierTable`] if the rows are not
    /// strictly decreasing in both tier and threshold, if a threshold is out
    /// of range, or if a row names COMMON (COMMON is the implicit floor).
    pub fn new(rows: Vec<TierThreshold>) -> DistributionResult<Self> {
        let table = Self { rows };
        table.validate()?;
        Ok(table)
    }

    /// Default lucky-slot table.
    #[must_use]
    pub fn lucky_default() -> Self {
        Self {
            rows: vec![
                TierThreshold::new(Rarity::Serialized, 9500),
                TierThreshold::new(Rarity::Mythical, 7500),
                TierThreshold::new(Rarity::Rare, 3500),
                TierThreshold::new(Rarity::Uncommon, 1000),
            ],
        }
    }

    /// Default table for every other slot.
    #[must_use]
    pub fn base_default() -> Self {
        Self {
            rows: vec![TierThreshold::new(Rarity::Uncommon, 7000)],
        }
    }

    /// The rows, rarest first.
    #[must_use]
    pub fn rows(&self) -> &[TierThreshold] {
        &self.rows
    }

    /// Checks the structural rules of a threshold table.
    ///
    /// # Errors
    ///
    /// See [`TierTable::new`].
    pub fn validate(&self) -> DistributionResult<()> {
        let mut previous: Option<TierThreshold> = None;
        for row in &self.rows {
            if row.tier == Rarity::Common {
                return Err(DistributionError::InvalidTierTable(
                    "COMMON is the implicit floor and cannot have a row".to_string(),
                ));
            }
            if row.min_roll_bp == 0 || row.min_roll_bp >= ROLL_PRECISION_BP {
                return Err(DistributionError::InvalidTierTable(format!(
                    "threshold {} for {} must be in 1..{}",
                    row.min_roll_bp, row.tier, ROLL_PRECISION_BP
                )));
            }
            if let Some(prev) = previous {
                if row.tier >= prev.tier {
                    return Err(DistributionError::InvalidTierTable(format!(
                        "{} listed after {}: rows must go from rarest to most common",
                        row.tier, prev.tier
                    )));
                }
                if row.min_roll_bp >= prev.min_roll_bp {
                    return Err(DistributionError::InvalidTierTable(format!(
                        "threshold {} for {} is not below {} for {}",
                        row.min_roll_bp, row.tier, prev.min_roll_bp, prev.tier
                    )));
                }
            }
            previous = Some(*row);
        }
        Ok(())
    }

    /// Checks that this table can drive non-lucky slots.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidTierTable`] if the table is
    /// malformed or names a scarce tier.
    pub fn validate_base(&self) -> DistributionResult<()> {
        self.validate()?;
        if let Some(row) = self.rows.iter().find(|row| row.tier.is_scarce()) {
            return Err(DistributionError::InvalidTierTable(format!(
                "{} is only reachable through the lucky slot",
                row.tier
            )));
        }
        Ok(())
    }

    /// Resolves a basis-point roll to a tier.
    #[inline]
    #[must_use]
    pub fn resolve(&self, roll: u16) -> Rarity {
        self.rows
            .iter()
            .find(|row| roll >= row.min_roll_bp)
            .map_or(Rarity::Common, |row| row.tier)
    }

    /// Probability of each tier in basis points, indexed by [`Rarity::index`].
    #[must_use]
    pub fn odds_bp(&self) -> [u16; Rarity::COUNT] {
        let mut odds = [0u16; Rarity::COUNT];
        let mut upper = ROLL_PRECISION_BP;
        for row in &self.rows {
            odds[row.tier.index()] = upper - row.min_roll_bp;
            upper = row.min_roll_bp;
        }
        odds[Rarity::Common.index()] = upper;
        odds
    }
}

/// The pair of tables the selector consults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTables {
    /// Table for the lucky slot.
    pub lucky: TierTable,
    /// Table for every other slot.
    pub base: TierTable,
}

impl TierTables {
    /// Builds the pair after validating both tables.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidTierTable`] if either table is
    /// malformed or the base table names a scarce tier.
    pub fn new(lucky: TierTable, base: TierTable) -> DistributionResult<Self> {
        let tables = Self { lucky, base };
        tables.validate()?;
        Ok(tables)
    }

    /// Validates both tables.
    ///
    /// # Errors
    ///
    /// See [`TierTables::new`].
    pub fn validate(&self) -> DistributionResult<()> {
        self.lucky.validate()?;
        self.base.validate_base()
    }
}

impl Default for TierTables {
    fn default() -> Self {
        Self {
            lucky: TierTable::lucky_default(),
            base: TierTable::base_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lucky_thresholds() {
        let table = TierTable::lucky_default();

        assert_eq!(table.resolve(9999), Rarity::Serialized);
        assert_eq!(table.resolve(9500), Rarity::Serialized);
        assert_eq!(table.resolve(9499), Rarity::Mythical);
        assert_eq!(table.resolve(7500), Rarity::Mythical);
        assert_eq!(table.resolve(7499), Rarity::Rare);
        assert_eq!(table.resolve(3500), Rarity::Rare);
        assert_eq!(table.resolve(3499), Rarity::Uncommon);
        assert_eq!(table.resolve(1000), Rarity::Uncommon);
        assert_eq!(table.resolve(999), Rarity::Common);
        assert_eq!(table.resolve(0), Rarity::Common);
    }

    #[test]
    fn test_base_table_never_scarce() {
        let table = TierTable::base_default();
        for roll in 0..ROLL_PRECISION_BP {
            assert!(!table.resolve(roll).is_scarce());
        }
    }

    #[test]
    fn test_odds_sum_to_precision() {
        let odds = TierTable::lucky_default().odds_bp();
        assert_eq!(odds[Rarity::Serialized.index()], 500);
        assert_eq!(odds[Rarity::Mythical.index()], 2000);
        assert_eq!(odds.iter().map(|bp| u32::from(*bp)).sum::<u32>(), 10_000);
    }

    #[test]
    fn test_roll_bp_reduces_modulo() {
        assert_eq!(roll_bp(0), 0);
        assert_eq!(roll_bp(10_000), 0);
        assert_eq!(roll_bp(19_501), 9501);
        assert!(roll_bp(u128::MAX) < ROLL_PRECISION_BP);
    }

    #[test]
    fn test_fallback_chain_walks_to_common() {
        let chain: Vec<_> = Rarity::Serialized.fallback_chain().collect();
        assert_eq!(
            chain,
            vec![
                Rarity::Serialized,
                Rarity::Mythical,
                Rarity::Rare,
                Rarity::Uncommon,
                Rarity::Common
            ]
        );
        assert_eq!(Rarity::Common.fallback_chain().count(), 1);
    }

    #[test]
    fn test_rejects_unordered_tables() {
        let swapped = TierTable::new(vec![
            TierThreshold::new(Rarity::Mythical, 9000),
            TierThreshold::new(Rarity::Serialized, 9500),
        ]);
        assert!(matches!(swapped, Err(DistributionError::InvalidTierTable(_))));

        let flat = TierTable::new(vec![
            TierThreshold::new(Rarity::Serialized, 9000),
            TierThreshold::new(Rarity::Mythical, 9000),
        ]);
        assert!(flat.is_err());

        let common_row = TierTable::new(vec![TierThreshold::new(Rarity::Common, 10)]);
        assert!(common_row.is_err());

        let out_of_range = TierTable::new(vec![TierThreshold::new(Rarity::Rare, 10_000)]);
        assert!(out_of_range.is_err());
    }

    #[test]
    fn test_base_table_rejects_scarce_rows() {
        let lucky = TierTable::lucky_default();
        let base = TierTable::new(vec![TierThreshold::new(Rarity::Rare, 9900)]).unwrap();
        assert!(TierTables::new(lucky, base).is_err());
    }

    #[test]
    fn test_rarity_ordering() {
        assert!(Rarity::Common < Rarity::Uncommon);
        assert!(Rarity::Mythical < Rarity::Serialized);
        assert_eq!(Rarity::from_u8(4), Some(Rarity::Serialized));
        assert_eq!(Rarity::from_u8(5), None);
    }
}
