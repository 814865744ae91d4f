//! SQLite import of advanced info CSVs.
//!
//! Repeated text values (sector, valuation, trend, ...) are normalized into
//! dictionary tables; each CSV row becomes one fact row in `VS_IMPORT` keyed
//! by import date and stock.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use tracing::{debug, info};

use valuestocks_common::{Error, Result};

use crate::artifacts::RUN_STAMP_FORMAT;
use crate::dlevels::AdvancedInfo;
use crate::{csv_error, db_error};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS VS_META_IMPORTDATE (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    DATENUM INTEGER NOT NULL UNIQUE,
    DATE TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS VS_META_STOCKINFO (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    SYMBOL_ID TEXT NOT NULL UNIQUE,
    NAME TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS VS_META_SECTOR (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    SECTOR_NAME TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS VS_META_VALUATION (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    VALUATION TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS VS_META_MARKETCAPTYPE (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    MARKETCAPTYPE TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS VS_META_TREND (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    TREND TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS VS_META_FUNDAMENTAL (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FUNDAMENTAL TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS VS_META_MOMENTUM (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    MOMENTUM TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS VS_IMPORT (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    IMPORT_DATE_ID INTEGER NOT NULL REFERENCES VS_META_IMPORTDATE(ID),
    SYMBOL_ID INTEGER NOT NULL REFERENCES VS_META_STOCKINFO(ID),
    SECTOR_ID INTEGER NOT NULL REFERENCES VS_META_SECTOR(ID),
    CMP REAL,
    VALUATION_ID INTEGER NOT NULL REFERENCES VS_META_VALUATION(ID),
    FAIR_RANGE TEXT,
    PE REAL,
    SECTOR_PE REAL,
    MARKET_CAP REAL,
    MARKETCAPTYPE_ID INTEGER NOT NULL REFERENCES VS_META_MARKETCAPTYPE(ID),
    TREND_ID INTEGER NOT NULL REFERENCES VS_META_TREND(ID),
    FUNDAMENTAL_ID INTEGER NOT NULL REFERENCES VS_META_FUNDAMENTAL(ID),
    MOMENTUM_ID INTEGER NOT NULL REFERENCES VS_META_MOMENTUM(ID),
    DERATIO REAL,
    PRICETOSALES REAL,
    PLEDGE REAL,
    QBS TEXT,
    QBS_PERC REAL,
    AGS TEXT,
    AGS_PERC REAL,
    VALUATION_DCF REAL,
    VALUATION_GRAHAM REAL,
    VALUATION_EARNING REAL,
    VALUATION_BOOKVALUE REAL,
    VALUATION_SALES REAL,
    UNIQUE (IMPORT_DATE_ID, SYMBOL_ID)
);
"#;

/// Single-column dictionary tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Sector,
    Valuation,
    MarketCapType,
    Trend,
    Fundamental,
    Momentum,
}

impl Lookup {
    fn table(self) -> &'static str {
        match self {
            Lookup::Sector => "VS_META_SECTOR",
            Lookup::Valuation => "VS_META_VALUATION",
            Lookup::MarketCapType => "VS_META_MARKETCAPTYPE",
            Lookup::Trend => "VS_META_TREND",
            Lookup::Fundamental => "VS_META_FUNDAMENTAL",
            Lookup::Momentum => "VS_META_MOMENTUM",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Lookup::Sector => "SECTOR_NAME",
            Lookup::Valuation => "VALUATION",
            Lookup::MarketCapType => "MARKETCAPTYPE",
            Lookup::Trend => "TREND",
            Lookup::Fundamental => "FUNDAMENTAL",
            Lookup::Momentum => "MOMENTUM",
        }
    }
}

/// Date an import is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDate {
    /// `YYYYmmdd` as an integer, e.g. `20250112`.
    pub datenum: i64,
    /// Human-readable date, e.g. `2025-01-12`.
    pub date: String,
}

impl ImportDate {
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self {
            datenum: at.format("%Y%m%d").to_string().parse().unwrap_or_default(),
            date: at.format("%Y-%m-%d").to_string(),
        }
    }

    /// Parse the `YYYYmmdd-HHMMSS` prefix of a generated file name.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the name carries no such prefix
    pub fn from_file_name(name: &str) -> Result<Self> {
        let stamp = name.get(..15).unwrap_or(name);
        NaiveDateTime::parse_from_str(stamp, RUN_STAMP_FORMAT)
            .map(Self::from_datetime)
            .map_err(|e| Error::InvalidInput(format!("No run timestamp in {}: {}", name, e)))
    }
}

fn number(raw: &str) -> Option<f64> {
    raw.trim().parse().ok()
}

/// Get the id of `value` in a dictionary table, inserting it if new.
fn lookup_id(tx: &Transaction<'_>, lookup: Lookup, value: &str) -> Result<i64> {
    tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES (?1)",
            lookup.table(),
            lookup.column()
        ),
        [value],
    )
    .map_err(db_error)?;

    tx.query_row(
        &format!(
            "SELECT ID FROM {} WHERE {} = ?1",
            lookup.table(),
            lookup.column()
        ),
        [value],
        |row| row.get(0),
    )
    .map_err(db_error)
}

fn import_date_id(tx: &Transaction<'_>, date: &ImportDate) -> Result<i64> {
    tx.execute(
        "INSERT OR IGNORE INTO VS_META_IMPORTDATE (DATENUM, DATE) VALUES (?1, ?2)",
        params![date.datenum, date.date],
    )
    .map_err(db_error)?;

    tx.query_row(
        "SELECT ID FROM VS_META_IMPORTDATE WHERE DATENUM = ?1",
        [date.datenum],
        |row| row.get(0),
    )
    .map_err(db_error)
}

fn stock_info_id(tx: &Transaction<'_>, symbol: &str, name: &str) -> Result<i64> {
    tx.execute(
        "INSERT OR IGNORE INTO VS_META_STOCKINFO (SYMBOL_ID, NAME) VALUES (?1, ?2)",
        params![symbol, name],
    )
    .map_err(db_error)?;

    tx.query_row(
        "SELECT ID FROM VS_META_STOCKINFO WHERE SYMBOL_ID = ?1",
        [symbol],
        |row| row.get(0),
    )
    .map_err(db_error)
}

fn insert_row(tx: &Transaction<'_>, date_id: i64, row: &AdvancedInfo) -> Result<()> {
    let stock_id = stock_info_id(tx, &row.symbol, &row.name)?;
    let sector_id = lookup_id(tx, Lookup::Sector, &row.sector)?;
    let valuation_id = lookup_id(tx, Lookup::Valuation, &row.valuation)?;
    let market_cap_type_id = lookup_id(tx, Lookup::MarketCapType, &row.market_cap_type)?;
    let trend_id = lookup_id(tx, Lookup::Trend, &row.trend)?;
    let fundamental_id = lookup_id(tx, Lookup::Fundamental, &row.fundamental)?;
    let momentum_id = lookup_id(tx, Lookup::Momentum, &row.momentum)?;

    tx.execute(
        r#"
        INSERT OR REPLACE INTO VS_IMPORT
        (IMPORT_DATE_ID, SYMBOL_ID, SECTOR_ID, CMP, VALUATION_ID,
         FAIR_RANGE, PE, SECTOR_PE, MARKET_CAP, MARKETCAPTYPE_ID, TREND_ID,
         FUNDAMENTAL_ID, MOMENTUM_ID, DERATIO, PRICETOSALES, PLEDGE, QBS,
         QBS_PERC, AGS, AGS_PERC, VALUATION_DCF, VALUATION_GRAHAM,
         VALUATION_EARNING, VALUATION_BOOKVALUE, VALUATION_SALES)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
        "#,
        params![
            date_id,
            stock_id,
            sector_id,
            number(&row.cmp),
            valuation_id,
            row.fair_range,
            number(&row.pe),
            number(&row.sector_pe),
            number(&row.market_cap),
            market_cap_type_id,
            trend_id,
            fundamental_id,
            momentum_id,
            number(&row.de_ratio),
            number(&row.price_to_sales),
            number(&row.pledge),
            row.qbs,
            number(&row.qbs_percent),
            row.ags,
            number(&row.ags_percent),
            number(&row.valuation_dcf),
            number(&row.valuation_graham),
            number(&row.valuation_earning),
            number(&row.valuation_book_value),
            number(&row.valuation_sales),
        ],
    )
    .map_err(db_error)?;

    Ok(())
}

/// Loads advanced info CSVs into a SQLite database.
pub struct Importer {
    conn: Connection,
}

impl Importer {
    /// Open or create a database, creating the schema if missing.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_error)?;
        conn.execute_batch(SCHEMA).map_err(db_error)?;

        info!("Import database opened");
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Import every row of `csv_path` in one transaction.
    ///
    /// Rows are filed under `date` unless the CSV carries `DATENUM` and
    /// `DATE` columns, in which case each row's own values are used.
    /// Re-importing a stock for the same date replaces the earlier row.
    ///
    /// Returns the number of rows imported.
    pub fn import_csv(&mut self, csv_path: &Path, date: &ImportDate) -> Result<usize> {
        let mut reader = csv::Reader::from_path(csv_path).map_err(csv_error)?;
        let headers = reader.headers().map_err(csv_error)?.clone();
        let datenum_col = headers.iter().position(|h| h == "DATENUM");
        let date_col = headers.iter().position(|h| h == "DATE");

        let tx = self.conn.transaction().map_err(db_error)?;
        let mut imported = 0;

        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let row: AdvancedInfo = record.deserialize(Some(&headers)).map_err(csv_error)?;

            let row_date = match (datenum_col, date_col) {
                (Some(n), Some(d)) => {
                    let datenum = record
                        .get(n)
                        .and_then(|v| v.trim().parse::<i64>().ok())
                        .ok_or_else(|| {
                            Error::InvalidInput(format!("Bad DATENUM for {}", row.symbol))
                        })?;
                    ImportDate {
                        datenum,
                        date: record.get(d).unwrap_or_default().to_string(),
                    }
                }
                _ => date.clone(),
            };

            let date_id = import_date_id(&tx, &row_date)?;
            insert_row(&tx, date_id, &row)?;
            imported += 1;
        }

        tx.commit().map_err(db_error)?;
        info!("Imported {} rows from {}", imported, csv_path.display());
        Ok(imported)
    }

    /// Number of fact rows filed under `datenum`.
    pub fn row_count(&self, datenum: i64) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM VS_IMPORT i
                JOIN VS_META_IMPORTDATE d ON d.ID = i.IMPORT_DATE_ID
                WHERE d.DATENUM = ?1
                "#,
                [datenum],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count as usize)
    }

    /// Symbols of a fundamental class on a given import date, sorted.
    pub fn symbols_with_fundamental(&self, datenum: i64, label: &str) -> Result<Vec<String>> {
        debug!("Querying {} symbols for {}", label, datenum);
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT s.SYMBOL_ID FROM VS_IMPORT i
                JOIN VS_META_IMPORTDATE d ON d.ID = i.IMPORT_DATE_ID
                JOIN VS_META_STOCKINFO s ON s.ID = i.SYMBOL_ID
                JOIN VS_META_FUNDAMENTAL f ON f.ID = i.FUNDAMENTAL_ID
                WHERE d.DATENUM = ?1 AND f.FUNDAMENTAL = ?2
                ORDER BY s.SYMBOL_ID
                "#,
            )
            .map_err(db_error)?;

        let symbols = stmt
            .query_map(params![datenum, label], |row| row.get(0))
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(db_error)?;
        Ok(symbols)
    }

    /// Closing price recorded for `symbol` on a given import date.
    pub fn closing_price(&self, datenum: i64, symbol: &str) -> Result<Option<f64>> {
        self.conn
            .query_row(
                r#"
                SELECT i.CMP FROM VS_IMPORT i
                JOIN VS_META_IMPORTDATE d ON d.ID = i.IMPORT_DATE_ID
                JOIN VS_META_STOCKINFO s ON s.ID = i.SYMBOL_ID
                WHERE d.DATENUM = ?1 AND s.SYMBOL_ID = ?2
                "#,
                params![datenum, symbol],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .map_err(db_error)
            .map(Option::flatten)
    }

    /// Number of distinct values in a dictionary table.
    pub fn dictionary_size(&self, lookup: Lookup) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", lookup.table()),
                [],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count as usize)
    }
}
