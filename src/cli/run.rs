//! Executes parsed commands against a repository

use crate::cli::commands::Commands;
use crate::core::record::{AttributeValue, VersionRecord};
use crate::core::temporal::Bound;
use crate::error::{Error, Result};
use crate::query::{Predicate, TemporalQuery};
use crate::store::Repository;
use serde_json::Value;
use std::io::Write;

/// Run `command`, writing one JSON record per line to `out`
pub async fn run<W: Write>(
    command: &Commands,
    repo: &Repository<Value>,
    out: &mut W,
) -> Result<()> {
    let records = match command {
        Commands::Insert {
            id,
            attrs,
            effective,
        } => vec![repo.insert(id.clone(), parse_attrs(attrs)?, *effective).await?],
        Commands::Update { id, attrs, as_of } => match as_of {
            Some(date) => repo.update_as_of(id, parse_attrs(attrs)?, *date).await?,
            None => vec![repo.update(id, parse_attrs(attrs)?).await?],
        },
        Commands::Transfer {
            id,
            attrs,
            effective,
        } => repo.transfer(id, parse_attrs(attrs)?, *effective).await?,
        Commands::Terminate { id, as_of } => {
            match as_of {
                Some(date) => repo.terminate_as_of(id, *date).await?,
                None => repo.terminate(id).await?,
            }
            Vec::new()
        }
        Commands::Get {
            id,
            business,
            processing,
        } => {
            let business = business.unwrap_or_else(|| repo.now());
            let found = repo
                .find_by_id_as_of(id, business, processing.unwrap_or(Bound::Infinity))
                .await?;
            found.into_iter().collect()
        }
        Commands::History { id } => repo.history(id).await?,
        Commands::Timeline { id } => repo.timeline(id).await?,
        Commands::List {
            filters,
            business,
            processing,
        } => {
            let business = business.unwrap_or_else(|| repo.now());
            let mut query = TemporalQuery::as_of(business, processing.unwrap_or(Bound::Infinity));
            for filter in filters {
                query = query.filter(parse_filter(filter)?);
            }
            repo.find(&query).await?
        }
        Commands::Scheduled { after } => {
            let after = after.unwrap_or_else(|| repo.now());
            repo.scheduled_changes(after).await?
        }
    };
    write_records(out, &records)
}

fn write_records<W: Write>(out: &mut W, records: &[VersionRecord<Value>]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    Ok(())
}

fn parse_attrs(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(Error::Configuration(format!(
            "attributes must be a JSON object, got {text}"
        )));
    }
    Ok(value)
}

/// `field=value`; the value is a number or boolean when it reads as one,
/// text otherwise
fn parse_filter(text: &str) -> Result<Predicate> {
    let (field, raw) = text
        .split_once('=')
        .ok_or_else(|| Error::Configuration(format!("filter {text:?} is not field=value")))?;
    let value = if let Ok(n) = raw.parse::<i64>() {
        AttributeValue::Int(n)
    } else if let Ok(x) = raw.parse::<f64>() {
        AttributeValue::Float(x)
    } else if let Ok(b) = raw.parse::<bool>() {
        AttributeValue::Bool(b)
    } else {
        AttributeValue::Text(raw.to_string())
    };
    Ok(Predicate::eq(field.trim(), value))
}
