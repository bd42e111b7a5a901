//! Recorded quote loading for replays.

use crate::venue::{MarketQuote, SecurityId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Quotes for every security at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub timestamp: DateTime<Utc>,
    pub quotes: BTreeMap<SecurityId, MarketQuote>,
}

/// CSV quote loader.
///
/// Expected CSV format (bid and ask may be empty):
/// ```csv
/// timestamp,security,bid,ask,last
/// 2024-03-01T10:00:00Z,NOTE-A,9.95,10.05,10.00
/// 2024-03-01T10:00:00Z,NOTE-B,,20.10,20.00
/// ```
#[derive(Debug, Clone)]
pub struct CsvQuoteLoader {
    /// Snapshots in timestamp order
    snapshots: Vec<QuoteSnapshot>,
    securities: Vec<SecurityId>,
}

impl CsvQuoteLoader {
    /// Load quotes from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load quotes from CSV content.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut by_timestamp: BTreeMap<DateTime<Utc>, BTreeMap<SecurityId, MarketQuote>> =
            BTreeMap::new();
        let mut securities = BTreeSet::new();
        let mut rows = 0usize;

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let row = CsvRow::parse(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            securities.insert(row.security.clone());
            by_timestamp
                .entry(row.timestamp)
                .or_default()
                .insert(row.security, row.quote);
            rows += 1;
        }

        if rows == 0 {
            anyhow::bail!("CSV file contains no data rows");
        }

        let snapshots = by_timestamp
            .into_iter()
            .map(|(timestamp, quotes)| QuoteSnapshot { timestamp, quotes })
            .collect();

        Ok(Self {
            snapshots,
            securities: securities.into_iter().collect(),
        })
    }

    pub fn snapshots(&self) -> &[QuoteSnapshot] {
        &self.snapshots
    }

    pub fn securities(&self) -> &[SecurityId] {
        &self.securities
    }

    /// First and last timestamp in the data.
    pub fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.snapshots.first()?;
        let last = self.snapshots.last()?;
        Some((first.timestamp, last.timestamp))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Internal struct for parsing CSV rows.
#[derive(Debug)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    security: SecurityId,
    quote: MarketQuote,
}

impl CsvRow {
    fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 5 {
            anyhow::bail!(
                "Expected 5 columns (timestamp,security,bid,ask,last), got {}",
                parts.len()
            );
        }

        let security = parts[1].trim();
        if security.is_empty() {
            anyhow::bail!("Empty security id");
        }

        let bid = parse_optional(parts[2]).with_context(|| format!("Invalid bid: {}", parts[2]))?;
        let ask = parse_optional(parts[3]).with_context(|| format!("Invalid ask: {}", parts[3]))?;
        let last: Decimal = parts[4]
            .trim()
            .parse()
            .with_context(|| format!("Invalid last: {}", parts[4]))?;

        if let (Some(bid), Some(ask)) = (bid, ask) {
            anyhow::ensure!(bid <= ask, "Crossed quote: bid {} > ask {}", bid, ask);
        }

        Ok(Self {
            timestamp: parts[0]
                .trim()
                .parse()
                .with_context(|| format!("Invalid timestamp: {}", parts[0]))?,
            security: SecurityId::from(security),
            quote: MarketQuote::new(bid, ask, last),
        })
    }
}

fn parse_optional(field: &str) -> Result<Option<Decimal>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    Ok(Some(field.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_csv_parsing() {
        let csv = r#"timestamp,security,bid,ask,last
2024-03-01T10:00:00Z,NOTE-A,9.95,10.05,10.00
2024-03-01T10:00:00Z,NOTE-B,,20.10,20.00
2024-03-01T10:00:05Z,NOTE-A,9.96,10.06,10.01
"#;

        let loader = CsvQuoteLoader::from_csv_content(csv).unwrap();

        assert_eq!(loader.len(), 2);
        assert_eq!(
            loader.securities(),
            &[SecurityId::from("NOTE-A"), SecurityId::from("NOTE-B")]
        );

        let first = &loader.snapshots()[0];
        let b = first.quotes[&SecurityId::from("NOTE-B")];
        assert_eq!(b.best_bid, None);
        assert_eq!(b.best_ask, Some(dec!(20.10)));

        let range = loader.available_range().unwrap();
        assert_eq!(range.0, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(range.1, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).unwrap());
    }

    #[test]
    fn test_rejects_bad_rows() {
        assert!(CsvQuoteLoader::from_csv_content("timestamp,security,bid,ask,last\n").is_err());
        assert!(CsvQuoteLoader::from_csv_content("2024-03-01T10:00:00Z,A,1,2").is_err());
        assert!(CsvQuoteLoader::from_csv_content("2024-03-01T10:00:00Z,A,3,2,2.5").is_err());
        assert!(CsvQuoteLoader::from_csv_content("yesterday,A,1,2,1.5").is_err());
    }
}
