use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::emissions;
use crate::extraction::{self, DraftEdits};
use crate::factors::FactorTable;
use crate::models::{
    Bill, BillDraft, Company, CompanyTotals, EmissionTotals, PendingExtraction, Source,
    UsageRecord,
};

pub const DEFAULT_LOGO: &str = "defaultlogo.png";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, factors: &FactorTable) -> anyhow::Result<usize> {
    let companies = vec![
        (
            Uuid::parse_str("5b8f0c3e-6f4d-4f0a-9a53-1f1c2d7e8a01")?,
            "Northwind Textiles",
            "ops@northwind.example",
        ),
        (
            Uuid::parse_str("a2c4e6f8-1b3d-4f5a-8c7e-9d0b2a4c6e02")?,
            "Harbor Logistics",
            "fleet@harbor.example",
        ),
    ];

    for (id, name, email) in &companies {
        upsert_company(pool, *id, name, email, DEFAULT_LOGO).await?;
    }

    let bills = vec![
        (
            "ops@northwind.example",
            "NW-2026-01",
            NaiveDate::from_ymd_opt(2026, 1, 31).context("invalid date")?,
            UsageRecord::new()
                .with(Source::Electricity, 1850.0, "kWh")
                .with(Source::Water, 42.0, "m3"),
        ),
        (
            "ops@northwind.example",
            "NW-2026-02",
            NaiveDate::from_ymd_opt(2026, 2, 28).context("invalid date")?,
            UsageRecord::new()
                .with(Source::Electricity, 1720.0, "kWh")
                .with(Source::NaturalGas, 310.0, "m3"),
        ),
        (
            "fleet@harbor.example",
            "HL-0142",
            NaiveDate::from_ymd_opt(2026, 2, 14).context("invalid date")?,
            UsageRecord::new()
                .with(Source::Diesel, 920.0, "liters")
                .with(Source::Petrol, 140.0, "liters"),
        ),
    ];

    let mut inserted = 0usize;
    for (email, bill_number, bill_date, usage) in bills {
        let company = find_company_by_email(pool, email)
            .await?
            .with_context(|| format!("seed company {email} missing"))?;

        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM emission_ledger.bills \
             WHERE company_id = $1 AND bill_number = $2) AS found",
        )
        .bind(company.id)
        .bind(bill_number)
        .fetch_one(pool)
        .await?
        .get("found");
        if exists {
            continue;
        }

        let draft = BillDraft {
            bill_date: Some(bill_date),
            bill_number: Some(bill_number.to_string()),
            usage,
            ..BillDraft::default()
        };
        let totals = emissions::compute_totals(factors, &draft.usage);
        insert_bill(pool, company.id, &draft, totals).await?;
        inserted += 1;
    }

    Ok(inserted)
}

async fn upsert_company(
    pool: &PgPool,
    id: Uuid,
    company_name: &str,
    email: &str,
    logo_path: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO emission_ledger.companies (id, company_name, email, logo_path)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET company_name = EXCLUDED.company_name, logo_path = EXCLUDED.logo_path
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(company_name)
    .bind(email)
    .bind(logo_path)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

pub async fn register_company(
    pool: &PgPool,
    company_name: &str,
    email: &str,
    logo_path: Option<&str>,
) -> anyhow::Result<Uuid> {
    let result = sqlx::query(
        r#"
        INSERT INTO emission_ledger.companies (id, company_name, email, logo_path)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(company_name)
    .bind(email)
    .bind(logo_path.unwrap_or(DEFAULT_LOGO))
    .fetch_one(pool)
    .await;

    let id: Uuid = match result {
        Ok(row) => row.get("id"),
        Err(err) => return Err(registration_error(err, email)),
    };
    info!(%id, company_name, "registered company");
    Ok(id)
}

fn registration_error(err: sqlx::Error, email: &str) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            anyhow::anyhow!("email {email} is already registered")
        }
        _ => anyhow::Error::new(err).context(format!("failed to register {email}")),
    }
}

pub async fn find_company_by_email(pool: &PgPool, email: &str) -> anyhow::Result<Option<Company>> {
    let row = sqlx::query(
        "SELECT id, company_name, email, logo_path \
         FROM emission_ledger.companies WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Company {
        id: row.get("id"),
        company_name: row.get("company_name"),
        email: row.get("email"),
        logo_path: row.get("logo_path"),
    }))
}

pub async fn company_by_email(pool: &PgPool, email: &str) -> anyhow::Result<Company> {
    find_company_by_email(pool, email)
        .await?
        .with_context(|| format!("no company registered with email {email}"))
}

pub async fn insert_bill(
    pool: &PgPool,
    company_id: Uuid,
    draft: &BillDraft,
    totals: EmissionTotals,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await?;
    let bill_id = write_bill(&mut tx, company_id, draft, totals).await?;
    tx.commit().await?;
    Ok(bill_id)
}

/// Writes a bill and its usage rows on the caller's connection; the caller
/// owns the transaction.
async fn write_bill(
    conn: &mut PgConnection,
    company_id: Uuid,
    draft: &BillDraft,
    totals: EmissionTotals,
) -> anyhow::Result<Uuid> {
    let bill_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO emission_ledger.bills
        (id, company_id, bill_date, bill_number, billing_period_start, billing_period_end,
         total_co2_tonnes, total_emission_kgco2e, bill_file_path)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(bill_id)
    .bind(company_id)
    .bind(draft.bill_date)
    .bind(draft.bill_number.as_deref())
    .bind(draft.billing_period_start)
    .bind(draft.billing_period_end)
    .bind(totals.co2_tonnes)
    .bind(totals.emission_kgco2e)
    .bind(draft.bill_file_path.as_deref())
    .execute(&mut *conn)
    .await?;

    for (source, usage) in draft.usage.iter() {
        sqlx::query(
            r#"
            INSERT INTO emission_ledger.bill_usages (bill_id, source, value, unit)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(bill_id)
        .bind(source.cli_name())
        .bind(usage.value)
        .bind(usage.unit.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    debug!(%bill_id, %company_id, kgco2e = totals.emission_kgco2e, "stored bill");
    Ok(bill_id)
}

#[derive(Debug, Clone, Copy)]
pub enum BillOrder {
    BillDateDesc,
    UploadedDesc,
}

impl BillOrder {
    fn clause(self) -> &'static str {
        match self {
            BillOrder::BillDateDesc => "bill_date DESC NULLS LAST, uploaded_at DESC",
            BillOrder::UploadedDesc => "uploaded_at DESC",
        }
    }
}

pub async fn fetch_bills(
    pool: &PgPool,
    company_id: Uuid,
    order: BillOrder,
) -> anyhow::Result<Vec<Bill>> {
    let query = format!(
        "SELECT id, bill_date, bill_number, billing_period_start, \
         billing_period_end, total_co2_tonnes, total_emission_kgco2e, uploaded_at, \
         bill_file_path \
         FROM emission_ledger.bills WHERE company_id = $1 ORDER BY {}",
        order.clause()
    );
    let rows = sqlx::query(&query).bind(company_id).fetch_all(pool).await?;

    let ids: Vec<Uuid> = rows.iter().map(|row| row.get("id")).collect();
    let mut usages = fetch_usages(pool, &ids).await?;

    let mut bills = Vec::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.get("id");
        bills.push(Bill {
            id,
            bill_date: row.get("bill_date"),
            bill_number: row.get("bill_number"),
            usage: usages.remove(&id).unwrap_or_default(),
            billing_period_start: row.get("billing_period_start"),
            billing_period_end: row.get("billing_period_end"),
            totals: EmissionTotals {
                co2_tonnes: row.get("total_co2_tonnes"),
                emission_kgco2e: row.get("total_emission_kgco2e"),
            },
            uploaded_at: row.get("uploaded_at"),
            bill_file_path: row.get("bill_file_path"),
        });
    }

    Ok(bills)
}

async fn fetch_usages(
    pool: &PgPool,
    bill_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, UsageRecord>> {
    let mut usages: HashMap<Uuid, UsageRecord> = HashMap::new();
    if bill_ids.is_empty() {
        return Ok(usages);
    }

    let rows = sqlx::query(
        "SELECT bill_id, source, value, unit \
         FROM emission_ledger.bill_usages WHERE bill_id = ANY($1)",
    )
    .bind(bill_ids)
    .fetch_all(pool)
    .await?;

    for row in rows {
        let bill_id: Uuid = row.get("bill_id");
        let source_name: String = row.get("source");
        let source: Source = match source_name.parse() {
            Ok(source) => source,
            Err(_) => {
                warn!(%bill_id, source = %source_name, "skipping usage with unknown source");
                continue;
            }
        };
        usages
            .entry(bill_id)
            .or_default()
            .set(source, row.get("value"), row.get("unit"));
    }

    Ok(usages)
}

pub async fn fetch_company_totals(pool: &PgPool) -> anyhow::Result<Vec<CompanyTotals>> {
    let rows = sqlx::query(
        r#"
        SELECT c.company_name, c.logo_path,
               COALESCE(SUM(b.total_emission_kgco2e), 0) AS total_emission,
               COUNT(b.id) AS bill_count
        FROM emission_ledger.companies c
        LEFT JOIN emission_ledger.bills b ON b.company_id = c.id
        GROUP BY c.id, c.company_name, c.logo_path
        ORDER BY c.created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let bill_count: i64 = row.get("bill_count");
            CompanyTotals {
                company_name: row.get("company_name"),
                logo_path: row.get("logo_path"),
                total_emission: row.get("total_emission"),
                bill_count: bill_count.max(0) as usize,
            }
        })
        .collect())
}

pub async fn stage_extraction(
    pool: &PgPool,
    company_id: Uuid,
    draft: &BillDraft,
    ttl: Duration,
) -> anyhow::Result<PendingExtraction> {
    let token = Uuid::new_v4();
    let created_at = Utc::now();
    let expires_at = created_at + ttl;
    let payload = serde_json::to_string(draft)?;

    sqlx::query(
        r#"
        INSERT INTO emission_ledger.pending_extractions
        (token, company_id, payload, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(token)
    .bind(company_id)
    .bind(payload)
    .bind(created_at)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(PendingExtraction {
        token,
        company_id,
        draft: draft.clone(),
        created_at,
        expires_at,
    })
}

/// Removes and returns a pending extraction. A token can be taken once;
/// expired tokens are treated as absent.
async fn take_extraction(
    conn: &mut PgConnection,
    token: Uuid,
) -> anyhow::Result<Option<PendingExtraction>> {
    let row = sqlx::query(
        r#"
        DELETE FROM emission_ledger.pending_extractions
        WHERE token = $1 AND expires_at > now()
        RETURNING token, company_id, payload, created_at, expires_at
        "#,
    )
    .bind(token)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let payload: String = row.get("payload");
    let draft: BillDraft =
        serde_json::from_str(&payload).context("corrupt pending extraction payload")?;
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(Some(PendingExtraction {
        token: row.get("token"),
        company_id: row.get("company_id"),
        draft,
        created_at,
        expires_at: row.get("expires_at"),
    }))
}

/// Turns a pending extraction into a bill. The token is only consumed when
/// the bill is stored; any failure rolls both back.
pub async fn save_extraction(
    pool: &PgPool,
    factors: &FactorTable,
    token: Uuid,
    edits: &DraftEdits,
) -> anyhow::Result<Option<(Uuid, EmissionTotals)>> {
    let mut tx = pool.begin().await?;
    let Some(pending) = take_extraction(&mut tx, token).await? else {
        return Ok(None);
    };

    let mut draft = pending.draft;
    edits.apply(&mut draft);
    let totals = emissions::compute_totals(factors, &draft.usage);
    let bill_id = write_bill(&mut tx, pending.company_id, &draft, totals).await?;

    tx.commit().await?;
    Ok(Some((bill_id, totals)))
}

pub async fn discard_extraction(pool: &PgPool, token: Uuid) -> anyhow::Result<bool> {
    let mut conn = pool.acquire().await?;
    Ok(take_extraction(&mut conn, token).await?.is_some())
}

pub async fn purge_expired_extractions(pool: &PgPool) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM emission_ledger.pending_extractions WHERE expires_at <= now()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Imports bills from a wide CSV: `company_email` plus any of the flat
/// bill fields (`bill_date`, `electricity_usage_value`, ...).
pub async fn import_csv(
    pool: &PgPool,
    factors: &FactorTable,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let headers = reader.headers()?.clone();
    let mut companies: HashMap<String, Option<Uuid>> = HashMap::new();
    let mut inserted = 0usize;

    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let line = index + 2;
        let fields: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
            .collect();

        let Some(email) = fields.get("company_email").and_then(Value::as_str) else {
            warn!(line, "skipping row without company_email");
            continue;
        };

        let company_id = match companies.get(email) {
            Some(id) => *id,
            None => {
                let id = find_company_by_email(pool, email).await?.map(|c| c.id);
                companies.insert(email.to_string(), id);
                id
            }
        };
        let Some(company_id) = company_id else {
            warn!(line, email, "skipping row for unregistered company");
            continue;
        };

        let draft = extraction::draft_from_fields(&fields);
        let totals = emissions::compute_totals(factors, &draft.usage);
        insert_bill(pool, company_id, &draft, totals).await?;
        inserted += 1;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_keeps_unrelated_errors() {
        let err = registration_error(sqlx::Error::RowNotFound, "ops@northwind.example");
        assert_eq!(err.to_string(), "failed to register ops@northwind.example");
        assert!(err.chain().any(|cause| cause.to_string().contains("no rows")));
    }
}
