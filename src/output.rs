//src/output.rs

use std::borrow::Borrow;
use std::io::Write;

use crate::batch::PairOutcome;
use crate::config::{FeatureReducers, OutputOptions};
use crate::error::Result;
use crate::types::{Feature, PairPrediction, SiteRecord};

/// Significant digits of the compact number form.
pub const SIGNIFICANT_DIGITS: usize = 8;

/// `%g`-like rendering with `precision` significant digits. Fixed notation
/// keeps at least one decimal (`2.0`); exponents carry a sign and two digits.
pub fn format_general(v: f64, precision: usize) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let precision = precision.max(1);
    // Rounded scientific form gives the exponent after rounding
    let sci = format!("{:.*e}", precision - 1, v);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = trim_fraction(mantissa, false);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, v), true)
    }
}

fn trim_fraction(s: &str, keep_one: bool) -> String {
    if !s.contains('.') {
        return if keep_one { format!("{}.0", s) } else { s.to_string() };
    }
    let trimmed = s.trim_end_matches('0');
    match trimmed.strip_suffix('.') {
        Some(int) if keep_one => format!("{}.0", int),
        Some(int) => int.to_string(),
        None => trimmed.to_string(),
    }
}

/// Shorter of the round-trip form and the 8-digit form, ties to the latter.
pub fn format_number(v: f64) -> String {
    let plain = v.to_string();
    let general = format_general(v, SIGNIFICANT_DIGITS);
    if plain.len() < general.len() {
        plain
    } else {
        general
    }
}

const SITE_COLUMNS: [&str; 4] = ["end_site", "seed_length", "nb_mismatches", "nb_gu_wobbles"];

/// Column names of the rows produced with `options`.
pub fn column_names(options: &OutputOptions) -> Vec<&'static str> {
    let mut names = vec!["mirna_id", "transcript_id"];
    if options.site_id && !options.combine {
        names.push("site_id");
    }
    names.extend(SITE_COLUMNS);
    names.extend(Feature::ALL.iter().map(|f| f.name()));
    names
}

fn site_row(prediction: &PairPrediction, ordinal: Option<usize>, record: &SiteRecord) -> String {
    let mut fields: Vec<String> = Vec::with_capacity(23);
    fields.push(prediction.mirna_id.clone());
    fields.push(prediction.transcript_id.clone());
    if let Some(n) = ordinal {
        fields.push(n.to_string());
    }
    let site = &record.site;
    fields.push(site.end_site.to_string());
    fields.push(site.seed_length.to_string());
    fields.push(site.nb_mismatches.to_string());
    fields.push(site.nb_gu_wobbles.to_string());
    fields.extend(Feature::ALL.iter().map(|&f| format_number(record.features.get(f))));
    fields.join("\t")
}

fn comma_list<F: Fn(&SiteRecord) -> usize>(prediction: &PairPrediction, field: F) -> String {
    prediction
        .sites
        .iter()
        .map(|r| field(r).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn combined_row(prediction: &PairPrediction, reducers: &FeatureReducers) -> String {
    let mut fields: Vec<String> = vec![
        prediction.mirna_id.clone(),
        prediction.transcript_id.clone(),
        comma_list(prediction, |r| r.site.end_site),
        comma_list(prediction, |r| r.site.seed_length),
        comma_list(prediction, |r| r.site.nb_mismatches),
        comma_list(prediction, |r| r.site.nb_gu_wobbles),
    ];
    fields.extend(prediction.combined(reducers).into_iter().map(format_number));
    fields.join("\t")
}

/// Rows of one prediction; empty for a pair without sites.
pub fn prediction_rows(
    prediction: &PairPrediction,
    options: &OutputOptions,
    reducers: &FeatureReducers,
) -> Vec<String> {
    if prediction.sites.is_empty() {
        return Vec::new();
    }
    if options.combine {
        return vec![combined_row(prediction, reducers)];
    }
    prediction
        .sites
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let ordinal = if options.site_id { Some(i + 1) } else { None };
            site_row(prediction, ordinal, record)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub pairs_with_sites: usize,
    pub rows: usize,
    pub failed: usize,
}

/// Writes the rows of every outcome in the given order. Failed pairs are
/// logged and contribute no row.
pub fn write_predictions<W, I, B>(
    writer: &mut W,
    outcomes: I,
    options: &OutputOptions,
    reducers: &FeatureReducers,
) -> Result<WriteSummary>
where
    W: Write,
    I: IntoIterator<Item = B>,
    B: Borrow<PairOutcome>,
{
    let mut summary = WriteSummary::default();
    for outcome in outcomes {
        let outcome = outcome.borrow();
        match &outcome.result {
            Ok(Some(prediction)) => {
                let rows = prediction_rows(prediction, options, reducers);
                if !rows.is_empty() {
                    summary.pairs_with_sites += 1;
                }
                for row in rows {
                    writeln!(writer, "{}", row)?;
                    summary.rows += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "Skipping mirna:{} transcript:{}: {}",
                    outcome.mirna_id,
                    outcome.transcript_id,
                    e
                );
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
