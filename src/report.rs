use std::fmt::Write;

use serde::Serialize;

use crate::aggregate::{self, MonthlyBySource, Series};
use crate::factors::FactorTable;
use crate::models::{Bill, Company, LeaderboardEntry};
use crate::score;

/// Chart payload for a company dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub line: Series,
    pub bar: MonthlyBySource,
    pub pie: Series,
    pub trend_pct: f64,
    pub score: f64,
}

pub fn chart_data(factors: &FactorTable, bills: &[Bill]) -> ChartData {
    let aggregates = aggregate::aggregate(factors, bills);
    let trend = score::trend_percent(&aggregates.monthly_series.data);
    let total_emission: f64 = bills.iter().map(|bill| bill.totals.emission_kgco2e).sum();

    ChartData {
        line: aggregates.monthly_series,
        bar: aggregates.monthly_by_source,
        pie: aggregates.per_source_all_time,
        trend_pct: score::round2(trend),
        score: score::score(total_emission, bills.len()),
    }
}

pub fn build_dashboard(company: &Company, charts: &ChartData, bills: &[Bill]) -> String {
    let mut output = String::new();
    let total_emission: f64 = bills.iter().map(|bill| bill.totals.emission_kgco2e).sum();
    let total_co2: f64 = bills.iter().map(|bill| bill.totals.co2_tonnes).sum();

    let _ = writeln!(output, "# Emissions Dashboard: {}", company.company_name);
    let _ = writeln!(output, "Contact: {} (logo {})", company.email, company.logo_path);
    let _ = writeln!(
        output,
        "Score {:.2} / 100 across {} bills ({:.2} kgCO2e, {:.3} t CO2)",
        charts.score,
        bills.len(),
        total_emission,
        total_co2
    );
    let _ = writeln!(output, "Month-over-month trend: {:+.2}%", charts.trend_pct);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Emissions");

    if charts.line.labels.is_empty() {
        let _ = writeln!(output, "No dated bills recorded.");
    } else {
        for (month, kgco2e) in charts.line.labels.iter().zip(&charts.line.data) {
            let _ = writeln!(output, "- {}: {:.2} kgCO2e", month, kgco2e);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Breakdown by Source");

    if charts.bar.labels.is_empty() {
        let _ = writeln!(output, "No source contributions recorded.");
    } else {
        for (index, month) in charts.bar.labels.iter().enumerate() {
            let parts: Vec<String> = charts
                .bar
                .datasets
                .iter()
                .filter(|dataset| dataset.data[index] > 0.0)
                .map(|dataset| format!("{} {:.2}", dataset.label, dataset.data[index]))
                .collect();
            let _ = writeln!(output, "- {}: {}", month, parts.join(", "));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Source Mix");

    if charts.pie.labels.is_empty() {
        let _ = writeln!(output, "No source contributions recorded.");
    } else {
        let pie_total: f64 = charts.pie.data.iter().sum();
        for (source, kgco2e) in charts.pie.labels.iter().zip(&charts.pie.data) {
            let share = if pie_total == 0.0 {
                0.0
            } else {
                kgco2e / pie_total * 100.0
            };
            let _ = writeln!(output, "- {}: {:.2} kgCO2e ({:.1}%)", source, kgco2e, share);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Previous Bills");

    if bills.is_empty() {
        let _ = writeln!(output, "No bills uploaded yet.");
    } else {
        for bill in bills {
            let _ = writeln!(output, "- {}", bill_line(bill));
        }
    }

    output
}

pub fn bill_line(bill: &Bill) -> String {
    let date = bill
        .bill_date
        .map(|date| date.to_string())
        .unwrap_or_else(|| "undated".to_string());
    let number = bill.bill_number.as_deref().unwrap_or("no number");
    let period = match (bill.billing_period_start, bill.billing_period_end) {
        (Some(start), Some(end)) => format!(", period {start} to {end}"),
        _ => String::new(),
    };
    let document = match &bill.bill_file_path {
        Some(path) => format!(", file {path}"),
        None => String::new(),
    };
    format!(
        "{} ({}{}) {:.2} kgCO2e, {:.3} t CO2, uploaded {}{}",
        date,
        number,
        period,
        bill.totals.emission_kgco2e,
        bill.totals.co2_tonnes,
        bill.uploaded_at.format("%Y-%m-%d %H:%M"),
        document
    )
}

pub fn build_leaderboard(entries: &[LeaderboardEntry]) -> String {
    let mut output = String::new();

    if entries.is_empty() {
        let _ = writeln!(output, "No companies registered.");
        return output;
    }

    for entry in entries {
        let _ = writeln!(
            output,
            "{:>3}. {} [{}] score {:.2} ({:.2} kgCO2e)",
            entry.rank, entry.company_name, entry.logo_path, entry.score, entry.total_emission
        );
    }
    output
}
