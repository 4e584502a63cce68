use serde::{Deserialize, Serialize};

/// A fixed price point: inserting exactly `pesos` buys `minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub pesos: u32,
    pub minutes: u32,
}

/// Conversion from inserted coins to access time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    /// Minutes per peso for amounts without an exact rate.
    pub time_per_peso: u32,
    #[serde(default)]
    pub rates: Vec<Rate>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            time_per_peso: 12,
            rates: vec![
                Rate {
                    pesos: 5,
                    minutes: 60,
                },
                Rate {
                    pesos: 10,
                    minutes: 150,
                },
                Rate {
                    pesos: 20,
                    minutes: 360,
                },
            ],
        }
    }
}

impl RateTable {
    /// Minutes bought by `pesos`: the exact rate if one matches, otherwise
    /// `pesos * time_per_peso`.
    pub fn minutes_for(&self, pesos: u32) -> u32 {
        self.rates
            .iter()
            .find(|r| r.pesos == pesos)
            .map_or_else(|| pesos.saturating_mul(self.time_per_peso), |r| r.minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rate_wins_over_linear_fallback() {
        let table = RateTable::default();
        assert_eq!(table.minutes_for(5), 60);
        assert_eq!(table.minutes_for(10), 150);
    }

    #[test]
    fn unlisted_amounts_use_time_per_peso() {
        let table = RateTable::default();
        assert_eq!(table.minutes_for(3), 36);
        assert_eq!(table.minutes_for(0), 0);
    }
}
