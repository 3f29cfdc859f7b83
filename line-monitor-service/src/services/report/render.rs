use super::ReportError;
use crate::models::{Report, ReportFormat, ReportRow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt::Write as _;

const REPORT_TITLE: &str = "Internet Lines Usage Report";
const HIGH_USAGE: f64 = 90.0;
const MEDIUM_USAGE: f64 = 75.0;

const CSV_HEADER: [&str; 15] = [
    "line_number",
    "name",
    "isp_name",
    "description",
    "download_speed",
    "upload_speed",
    "ping",
    "data_used",
    "usage_percentage",
    "data_remaining",
    "balance",
    "renewal_date",
    "remaining_days",
    "renewal_cost",
    "public_address",
];

/// A report in its wire form. Rendered once per cycle and reused for every
/// delivery attempt and for the local fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub format: ReportFormat,
    pub generated_at: DateTime<Utc>,
    pub body: String,
}

impl RenderedReport {
    pub fn content_type(&self) -> &'static str {
        match self.format {
            ReportFormat::Html => "text/html; charset=utf-8",
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Flat per-line view shared by the JSON and CSV renderings.
#[derive(Debug, Serialize)]
struct ReportLine<'a> {
    line_number: &'a str,
    name: &'a str,
    isp_name: &'a str,
    description: &'a str,
    download_speed: Option<f64>,
    upload_speed: Option<f64>,
    ping: Option<f64>,
    data_used: Option<f64>,
    usage_percentage: Option<f64>,
    data_remaining: Option<f64>,
    balance: Option<f64>,
    renewal_date: Option<NaiveDate>,
    remaining_days: Option<i64>,
    renewal_cost: Option<f64>,
    public_address: Option<&'a str>,
}

impl<'a> From<&'a ReportRow> for ReportLine<'a> {
    fn from(row: &'a ReportRow) -> Self {
        let quota = row.quota.as_ref();
        let speed = row.measurement.as_ref();
        Self {
            line_number: &row.line_number,
            name: &row.name,
            isp_name: &row.provider,
            description: &row.description,
            download_speed: speed.map(|m| m.download_mbps),
            upload_speed: speed.map(|m| m.upload_mbps),
            ping: speed.map(|m| m.latency_ms),
            data_used: quota.map(|q| q.used),
            usage_percentage: quota.map(|q| q.usage_percentage),
            data_remaining: quota.map(|q| q.remaining),
            balance: quota.and_then(|q| q.balance),
            renewal_date: quota.and_then(|q| q.renewal_date),
            remaining_days: quota.and_then(|q| q.days_to_renewal),
            renewal_cost: quota.and_then(|q| q.renewal_cost),
            public_address: speed.map(|m| m.public_address.as_str()),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    report_type: &'static str,
    mode: String,
    total_lines: usize,
    lines: Vec<ReportLine<'a>>,
}

pub fn render(report: &Report, format: ReportFormat) -> Result<RenderedReport, ReportError> {
    let body = match format {
        ReportFormat::Html => render_html(report),
        ReportFormat::Json => render_json(report)?,
        ReportFormat::Csv => render_csv(report),
    };
    Ok(RenderedReport {
        format,
        generated_at: report.generated_at,
        body,
    })
}

fn render_json(report: &Report) -> Result<String, ReportError> {
    let document = JsonReport {
        generated_at: report.generated_at,
        report_type: REPORT_TITLE,
        mode: report.mode.to_string(),
        total_lines: report.rows.len(),
        lines: report.rows.iter().map(ReportLine::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

fn render_csv(report: &Report) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");

    for row in &report.rows {
        let line = ReportLine::from(row);
        let fields = [
            csv_field(line.line_number),
            csv_field(line.name),
            csv_field(line.isp_name),
            csv_field(line.description),
            opt_number(line.download_speed),
            opt_number(line.upload_speed),
            opt_number(line.ping),
            opt_number(line.data_used),
            opt_number(line.usage_percentage),
            opt_number(line.data_remaining),
            opt_number(line.balance),
            line.renewal_date.map(|d| d.to_string()).unwrap_or_default(),
            line.remaining_days.map(|d| d.to_string()).unwrap_or_default(),
            opt_number(line.renewal_cost),
            line.public_address.map(csv_field).unwrap_or_default(),
        ];
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt_number(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

fn usage_class(usage: f64) -> &'static str {
    if usage > HIGH_USAGE {
        "data-row high-usage"
    } else if usage > MEDIUM_USAGE {
        "data-row medium-usage"
    } else {
        "data-row normal-usage"
    }
}

fn render_html(report: &Report) -> String {
    let mut html = String::with_capacity(4096 + report.rows.len() * 512);
    html.push_str(HTML_HEAD);
    let _ = write!(
        html,
        "<h1>{REPORT_TITLE}</h1>\n<p class=\"meta\">Generated {} &middot; mode: {}</p>\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        report.mode
    );
    html.push_str(HTML_TABLE_HEAD);

    for row in &report.rows {
        let line = ReportLine::from(row);
        let usage = line.usage_percentage.unwrap_or(0.0);
        let _ = write!(html, "<tr class=\"{}\">", usage_class(usage));
        for cell in [
            text_cell(line.line_number),
            text_cell(line.name),
            text_cell(line.isp_name),
            text_cell(line.description),
            number_cell(line.download_speed),
            number_cell(line.upload_speed),
            number_cell(line.ping),
            number_cell(line.data_used),
            format!("<strong>{usage:.1}%</strong>"),
            number_cell(line.data_remaining),
            line.renewal_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            number_cell(line.balance),
        ] {
            let _ = write!(html, "<td>{cell}</td>");
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>\n</div>\n</body>\n</html>\n");
    html
}

fn text_cell(value: &str) -> String {
    if value.is_empty() {
        "N/A".to_string()
    } else {
        escape_html(value)
    }
}

fn number_cell(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "N/A".to_string())
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const HTML_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Line Results Report</title>
<style>
body { font-family: Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }
.table-container { margin: 20px auto; max-width: 1400px; background-color: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
h1 { color: #333; text-align: center; margin-bottom: 8px; }
.meta { color: #777; text-align: center; margin-top: 0; }
table { width: 100%; border-collapse: collapse; }
th, td { border: 1px solid #dddddd; text-align: center; vertical-align: middle; padding: 12px; }
th { background-color: #ffa500; color: white; font-weight: bold; }
tr.high-usage td { background-color: #ffcccc !important; }
tr.medium-usage td { background-color: #ffeb99 !important; }
tr.normal-usage td { background-color: #ffffff !important; }
</style>
</head>
<body>
<div class="table-container">
"#;

const HTML_TABLE_HEAD: &str = r#"<table>
<thead>
<tr class="header-row"><th colspan="4">Line Information</th><th colspan="3">Speed Test</th><th colspan="5">Quota &amp; Balance</th></tr>
<tr><th>Number</th><th>Name</th><th>ISP</th><th>Description</th><th>Download (Mbps)</th><th>Upload (Mbps)</th><th>Ping (ms)</th><th>Used (GB)</th><th>Usage %</th><th>Remaining (GB)</th><th>Renewal Date</th><th>Balance</th></tr>
</thead>
<tbody>
"#;
