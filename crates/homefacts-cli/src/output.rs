use serde_json::Value;

use crate::cli::OutputFormat;
use crate::commands::CommandResult;
use crate::error::CliError;

pub fn render(result: &CommandResult, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(&result.data)?
            } else {
                serde_json::to_string(&result.data)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => render_table(&result.data)?,
    }

    Ok(())
}

fn render_table(data: &Value) -> Result<(), CliError> {
    if let Some(sources) = data.get("sources").and_then(Value::as_array) {
        for source in sources {
            println!(
                "{:<22} {:<20} {}",
                text(&source["id"]),
                text(&source["tier"]),
                if source["enabled"].as_bool().unwrap_or(false) {
                    "enabled"
                } else {
                    "disabled"
                }
            );
        }
        return Ok(());
    }

    println!("request_id  : {}", text(&data["meta"]["requestId"]));
    println!("strategy    : {}", text(&data["meta"]["strategy"]));
    println!("latency_ms  : {}", data["meta"]["latencyMs"]);
    println!("success     : {}", data["success"]);

    if let Some(fields) = data["canonicalRecord"]["fields"].as_object() {
        println!("fields:");
        for (name, field) in fields {
            let disputed = if field["disputed"].as_bool().unwrap_or(false) {
                " (disputed)"
            } else {
                ""
            };
            println!(
                "  {name:<16} {:<14} {:<6} {}{disputed}",
                text(&field["primary"]["value"]),
                text(&field["band"]),
                text(&field["primary"]["sourceId"]),
            );
        }
    }

    if let Some(failed) = data["failedSources"].as_array() {
        if !failed.is_empty() {
            println!("failed:");
            for record in failed {
                println!(
                    "  - {}: {} {}",
                    text(&record["sourceId"]),
                    text(&record["status"]),
                    text(&record["detail"])
                );
            }
        }
    }

    if let Some(warnings) = data["warnings"].as_array() {
        if !warnings.is_empty() {
            println!("warnings:");
            for warning in warnings {
                println!("  - {}", text(warning));
            }
        }
    }

    Ok(())
}

fn text(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
