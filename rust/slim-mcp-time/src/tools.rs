//! Time and timezone tools.
//!
//! Timezones are IANA names such as `Europe/London`. Times to convert are
//! `HH:MM` (24-hour) on today's date in the source timezone.

use chrono::{DateTime, NaiveTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use slim_mcp::mcp::{McpServer, ToolDefinition};
use tracing::warn;

pub const GET_CURRENT_TIME: &str = "get_current_time";
pub const CONVERT_TIME: &str = "convert_time";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeResult {
    pub timezone: String,
    pub datetime: String,
    pub is_dst: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConversionResult {
    pub source: TimeResult,
    pub target: TimeResult,
    /// e.g. `+2.0h`, `-5.5h`, `+5.75h`
    pub time_difference: String,
}

#[derive(Debug, Deserialize)]
struct ConvertTimeArgs {
    source_timezone: String,
    time: String,
    target_timezone: String,
}

pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>()
        .map_err(|_| format!("Invalid timezone: {name:?} is not an IANA timezone name"))
}

/// The timezone used when the caller names none.
///
/// An explicit override must be valid. Otherwise the system timezone is used,
/// falling back to UTC when it cannot be determined.
pub fn local_timezone(override_name: Option<&str>) -> Result<Tz, String> {
    if let Some(name) = override_name {
        return parse_timezone(name);
    }
    match iana_time_zone::get_timezone() {
        Ok(name) => parse_timezone(&name).or_else(|error| {
            warn!(%error, "Unknown system timezone, using UTC");
            Ok(Tz::UTC)
        }),
        Err(error) => {
            warn!(%error, "Could not determine local timezone, using UTC");
            Ok(Tz::UTC)
        }
    }
}

fn time_result(datetime: &DateTime<Tz>) -> TimeResult {
    TimeResult {
        timezone: datetime.timezone().name().to_string(),
        datetime: datetime.to_rfc3339_opts(SecondsFormat::Secs, false),
        is_dst: datetime.offset().dst_offset() != TimeDelta::zero(),
    }
}

fn utc_offset_seconds(datetime: &DateTime<Tz>) -> i32 {
    let offset = datetime.offset();
    let total = offset.base_utc_offset() + offset.dst_offset();
    i32::try_from(total.num_seconds()).unwrap_or_default()
}

pub fn format_difference(seconds: i32) -> String {
    let hours = f64::from(seconds) / 3600.0;
    if hours.fract() == 0.0 {
        format!("{hours:+.1}h")
    } else {
        let text = format!("{hours:+.2}");
        format!("{}h", text.trim_end_matches('0').trim_end_matches('.'))
    }
}

pub fn get_current_time(timezone: &str, now: DateTime<Utc>) -> Result<TimeResult, String> {
    let tz = parse_timezone(timezone)?;
    Ok(time_result(&now.with_timezone(&tz)))
}

pub fn convert_time(
    source_timezone: &str,
    time: &str,
    target_timezone: &str,
    now: DateTime<Utc>,
) -> Result<TimeConversionResult, String> {
    let source = parse_timezone(source_timezone)?;
    let target = parse_timezone(target_timezone)?;
    let parsed = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| "Invalid time format. Expected HH:MM [24-hour format]".to_string())?;

    let local = now.with_timezone(&source).date_naive().and_time(parsed);
    // An ambiguous wall time (DST fall-back) resolves to its first occurrence.
    let source_time = source
        .from_local_datetime(&local)
        .earliest()
        .ok_or_else(|| format!("{local} does not exist in {source_timezone}"))?;
    let target_time = source_time.with_timezone(&target);

    Ok(TimeConversionResult {
        source: time_result(&source_time),
        target: time_result(&target_time),
        time_difference: format_difference(
            utc_offset_seconds(&target_time) - utc_offset_seconds(&source_time),
        ),
    })
}

fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn query_error(error: String) -> String {
    format!("Error processing mcp-server-time query: {error}")
}

/// The time MCP server with both tools registered.
///
/// `local_tz` is advertised in the tool descriptions as the timezone to use
/// when the user names none.
pub fn time_server(local_tz: Tz) -> McpServer {
    let local = local_tz.name();
    McpServer::new("mcp-time", env!("CARGO_PKG_VERSION"))
        .with_tool(
            ToolDefinition {
                name: GET_CURRENT_TIME.to_string(),
                description: "Get current time in a specific timezones".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "timezone": {
                            "type": "string",
                            "description": format!("IANA timezone name (e.g., 'America/New_York', 'Europe/London'). Use '{local}' as local timezone if no timezone provided by the user.")
                        }
                    },
                    "required": ["timezone"]
                }),
            },
            |args| {
                let timezone = args
                    .get("timezone")
                    .and_then(Value::as_str)
                    .filter(|tz| !tz.is_empty())
                    .ok_or_else(|| query_error("Missing required argument: timezone".into()))?;
                to_value(get_current_time(timezone, Utc::now()).map_err(query_error)?)
            },
        )
        .with_tool(
            ToolDefinition {
                name: CONVERT_TIME.to_string(),
                description: "Convert time between timezones".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "source_timezone": {
                            "type": "string",
                            "description": format!("Source IANA timezone name (e.g., 'America/New_York', 'Europe/London'). Use '{local}' as local timezone if no source timezone provided by the user.")
                        },
                        "time": {
                            "type": "string",
                            "description": "Time to convert in 24-hour format (HH:MM)"
                        },
                        "target_timezone": {
                            "type": "string",
                            "description": format!("Target IANA timezone name (e.g., 'Asia/Tokyo', 'America/San_Francisco'). Use '{local}' as local timezone if no target timezone provided by the user.")
                        }
                    },
                    "required": ["source_timezone", "time", "target_timezone"]
                }),
            },
            |args| {
                let args: ConvertTimeArgs = serde_json::from_value(args)
                    .map_err(|_| query_error("Missing required arguments".into()))?;
                let result = convert_time(
                    &args.source_timezone,
                    &args.time,
                    &args.target_timezone,
                    Utc::now(),
                )
                .map_err(query_error)?;
                to_value(result)
            },
        )
}
