use anyhow::Result;
use colored::{Color, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{format, Cell, Row, Table};
use serde_json::{Map, Value};
use std::time::Duration;

const SPINNER_TICK: Duration = Duration::from_millis(200);
const BOX_PADDING: usize = 4;

/// Terminal output; boxes and the spinner are hidden in verbose/debug mode
/// where log lines take their place.
#[derive(Debug, Clone)]
pub struct Printer {
    interactive: bool,
    spinner: ProgressBar,
}

impl Printer {
    pub fn new(interactive: bool) -> Self {
        let spinner = if interactive {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
                spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✔"]));
            }
            spinner
        } else {
            ProgressBar::hidden()
        };
        Self { interactive, spinner }
    }

    /// Show `msg` next to the spinner, starting it on first use.
    pub fn spin(&self, msg: impl Into<String>) {
        if !self.interactive {
            return;
        }
        self.spinner.enable_steady_tick(SPINNER_TICK);
        self.spinner.set_message(msg.into());
    }

    pub fn stop_spinner(&self) {
        self.spinner.finish_and_clear();
    }

    /// Byte counting progress bar for model transfers.
    pub fn bytes_bar(&self, length: u64, msg: impl Into<String>) -> ProgressBar {
        if !self.interactive {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(length);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(msg.into());
        bar
    }

    fn print_box(&self, title: &str, msg: &str, color: Color) {
        if self.interactive {
            self.stop_spinner();
            println!("{}", render_box(title, msg).color(color));
        }
    }

    pub fn green_box(&self, title: &str, msg: &str) {
        self.print_box(title, msg, Color::Green);
    }

    pub fn yellow_box(&self, title: &str, msg: &str) {
        self.print_box(title, msg, Color::Yellow);
    }
}

/// Rounded box with the title centred on the top border.
pub fn render_box(title: &str, msg: &str) -> String {
    let lines: Vec<&str> = msg.lines().collect();
    let content_width = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count() + 2))
        .max()
        .unwrap_or_default();
    let inner = content_width + BOX_PADDING * 2;

    let label = format!(" {} ", title);
    let left = (inner - label.chars().count()) / 2;
    let right = inner - label.chars().count() - left;

    let mut out = format!("╭{}{}{}╮\n", "─".repeat(left), label, "─".repeat(right));
    let blank = format!("│{}│\n", " ".repeat(inner));
    out.push_str(&blank);
    for line in lines {
        let fill = content_width - line.chars().count();
        out.push_str(&format!(
            "│{pad}{line}{fill}{pad}│\n",
            pad = " ".repeat(BOX_PADDING),
            line = line,
            fill = " ".repeat(fill)
        ));
    }
    out.push_str(&blank);
    out.push_str(&format!("╰{}╯", "─".repeat(inner)));
    out
}

/// Borderless table with upper-case headers.
pub fn table(header: &[&str], rows: &[Vec<String>]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.set_titles(Row::new(
        header.iter().map(|h| Cell::new(&h.to_uppercase())).collect(),
    ));
    for row in rows {
        table.add_row(Row::new(row.iter().map(|c| Cell::new(c)).collect()));
    }
    table
}

pub fn print_table(header: &[&str], rows: &[Vec<String>]) {
    table(header, rows).printstd();
}

/// `Rasa production version:` → `rasa_production_version`
pub fn json_key(label: &str) -> String {
    label
        .trim()
        .replace(':', "")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// `label: value` pairs as a JSON object.
pub fn fields_to_json(fields: &[(String, Value)]) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(label, value)| (json_key(label), value.clone()))
        .collect();
    Value::Object(map)
}

/// Unix timestamp with fractional seconds as `02 Jan 06 15:04 UTC`.
pub fn format_timestamp(ts: f64) -> Result<String> {
    let secs = ts.trunc() as i64;
    let nanos = (ts.fract() * 1e9) as u32;
    let time = chrono::DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| anyhow::anyhow!("invalid timestamp {}", ts))?;
    Ok(time.format("%d %b %y %H:%M UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn box_lines_have_equal_width() {
        let rendered = render_box("Rasa X", "URL: http://bot.rasactl.localhost\nRasa X version: 1.0.1");
        let widths: Vec<usize> = rendered.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]), "{}", rendered);
        assert!(rendered.starts_with('╭'));
        assert!(rendered.lines().next().unwrap().contains(" Rasa X "));
    }

    #[test]
    fn json_keys() {
        assert_eq!(json_key("Rasa production version"), "rasa_production_version");
        assert_eq!(json_key("URL:"), "url");
        assert_eq!(
            fields_to_json(&[
                ("Name".into(), json!("bot")),
                ("Enterprise".into(), json!(false)),
            ]),
            json!({"name": "bot", "enterprise": false})
        );
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(1628589600.5).unwrap(), "10 Aug 21 10:00 UTC");
    }

    #[test]
    fn table_rows() {
        let t = table(
            &["Name", "Status"],
            &[vec!["bot".into(), "Running".into()]],
        );
        let rendered = t.to_string();
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("Running"));
    }

    #[test]
    fn quiet_printer_hides_progress() {
        let printer = Printer::new(false);
        assert!(printer.bytes_bar(10, "x").is_hidden());
        printer.spin("ignored");
        printer.green_box("t", "m");
    }
}
