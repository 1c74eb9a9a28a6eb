//! Styled terminal output using anstyle.
//!
//! Renders a tab's sightings as cards: address, threat badge, location,
//! geo details, reputation details and the AbuseIPDB link. Colors are only
//! emitted on a terminal and when `NO_COLOR` is unset.

use anstyle::{AnsiColor, Color, Style};
use std::fmt::Write;
use std::io;
use std::net::Ipv4Addr;

use crate::model::{AbuseResult, EnrichmentResult, GeoResult, SightingRecord, TabId};
use crate::output::{OutputFormatter, TabStats, ThreatLevel, abuseipdb_check_url, geo_summary};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Style definitions for different UI elements
pub struct Styles {
    pub header: Style,
    pub label: Style,
    pub safe: Style,
    pub warning: Style,
    pub danger: Style,
    pub pending: Style,
    pub muted: Style,
    pub ip: Style,
    pub url: Style,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            header: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Blue))),
            label: Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
            safe: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
            warning: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
            danger: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
            pending: Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
            muted: Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
            ip: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Magenta))),
            url: Style::new()
                .fg_color(Some(Color::Ansi(AnsiColor::Blue)))
                .underline(),
        }
    }
}

impl Styles {
    fn threat(&self, level: ThreatLevel) -> &Style {
        match level {
            ThreatLevel::Safe => &self.safe,
            ThreatLevel::LowRisk | ThreatLevel::MediumRisk => &self.warning,
            ThreatLevel::HighRisk | ThreatLevel::Error => &self.danger,
            ThreatLevel::Checking | ThreatLevel::NotScanned => &self.pending,
        }
    }
}

/// Styled output formatter for tab listings and lookups
pub struct StyledFormatter {
    styles: Styles,
    use_colors: bool,
}

impl StyledFormatter {
    /// Create a new styled formatter
    pub fn new() -> Self {
        Self {
            styles: Styles::default(),
            use_colors: Self::should_use_colors(),
        }
    }

    /// Create a formatter without colors (for non-interactive use)
    pub fn without_colors() -> Self {
        Self {
            styles: Styles::default(),
            use_colors: false,
        }
    }

    /// Determine if colors should be used based on environment
    fn should_use_colors() -> bool {
        atty::is(atty::Stream::Stdout) && std::env::var("NO_COLOR").is_err()
    }

    /// Apply style to text if colors are enabled
    fn styled(&self, text: &str, style: &Style) -> String {
        if self.use_colors {
            format!("{}{}{}", style.render(), text, style.render_reset())
        } else {
            text.to_string()
        }
    }

    fn write_rule(&self, output: &mut String) -> std::fmt::Result {
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))
    }

    fn write_row(&self, output: &mut String, label: &str, value: &str) -> std::fmt::Result {
        writeln!(
            output,
            "    {} {}",
            self.styled(&format!("{label:<12}"), &self.styles.label),
            value
        )
    }

    fn write_badge_line(
        &self,
        output: &mut String,
        ip: Ipv4Addr,
        level: ThreatLevel,
    ) -> std::fmt::Result {
        writeln!(
            output,
            "  {}  [{}]",
            self.styled(&ip.to_string(), &self.styles.ip),
            self.styled(level.label(), self.styles.threat(level))
        )
    }

    fn write_geo(&self, output: &mut String, geo: &GeoResult, abuse: Option<&AbuseResult>) -> std::fmt::Result {
        let unknown = "Unknown";
        if let Some(location) = geo_summary(geo) {
            writeln!(output, "    🌍 {location}")?;
        }
        self.write_row(output, "Country:", geo.country.as_deref().unwrap_or(unknown))?;
        self.write_row(output, "City:", geo.city.as_deref().unwrap_or(unknown))?;
        self.write_row(output, "ISP:", geo.isp.as_deref().unwrap_or(unknown))?;
        self.write_row(output, "ASN:", geo.asn.as_deref().unwrap_or(unknown))?;

        let report = abuse.and_then(AbuseResult::report);
        let hostnames = report
            .filter(|r| !r.hostnames.is_empty())
            .map(|r| r.hostnames.join(", "));
        self.write_row(output, "Hostname(s):", hostnames.as_deref().unwrap_or(unknown))?;
        let domain = report
            .and_then(|r| r.domain.as_deref())
            .or(geo.domain.as_deref());
        self.write_row(output, "Domain:", domain.unwrap_or(unknown))
    }

    fn write_abuse(&self, output: &mut String, abuse: &AbuseResult) -> std::fmt::Result {
        match abuse {
            AbuseResult::Failed { error } => {
                writeln!(output, "    {}", self.styled(error, &self.styles.danger))
            }
            AbuseResult::Report(report) => {
                self.write_row(
                    output,
                    "Usage Type:",
                    report.usage_type.as_deref().unwrap_or("Unknown"),
                )?;
                if let Some(score) = report.abuse_score {
                    self.write_row(output, "Abuse Score:", &format!("{score}%"))?;
                }
                if let Some(reports) = report.reports {
                    self.write_row(output, "Reports:", &reports.to_string())?;
                }
                if report.is_tor == Some(true) {
                    self.write_row(output, "Tor Exit:", "Yes")?;
                }
                Ok(())
            }
        }
    }

    fn write_card(
        &self,
        output: &mut String,
        ip: Ipv4Addr,
        level: ThreatLevel,
        geo: Option<&GeoResult>,
        abuse: Option<&AbuseResult>,
    ) -> std::fmt::Result {
        writeln!(output)?;
        self.write_badge_line(output, ip, level)?;
        if let Some(geo) = geo {
            self.write_geo(output, geo, abuse)?;
        }
        if let Some(abuse) = abuse {
            self.write_abuse(output, abuse)?;
        }
        writeln!(
            output,
            "    🔍 {}",
            self.styled(&abuseipdb_check_url(ip), &self.styles.url)
        )
    }

    fn render_tab(
        &self,
        tab: TabId,
        records: &[&SightingRecord],
        stats: TabStats,
    ) -> Result<String, std::fmt::Error> {
        let mut output = String::new();
        self.write_rule(&mut output)?;
        writeln!(
            output,
            "  {}",
            self.styled(&format!("🛡  Tab {tab}"), &self.styles.header)
        )?;
        let malicious = format!("{} malicious", stats.malicious);
        writeln!(
            output,
            "  {} IPs · {}",
            stats.total,
            if stats.malicious > 0 {
                self.styled(&malicious, &self.styles.danger)
            } else {
                malicious
            }
        )?;
        self.write_rule(&mut output)?;

        if records.is_empty() {
            writeln!(output)?;
            writeln!(
                output,
                "  {}",
                self.styled("No IP addresses found", &self.styles.muted)
            )?;
            return Ok(output);
        }

        for record in records {
            self.write_card(
                &mut output,
                record.ip,
                ThreatLevel::assess(record),
                record.geo.as_ref(),
                record.abuse.as_ref(),
            )?;
            writeln!(
                output,
                "    {}",
                self.styled(&record.sources.join(", "), &self.styles.muted)
            )?;
        }
        Ok(output)
    }

    fn render_lookup(&self, ip: Ipv4Addr, result: &EnrichmentResult) -> Result<String, std::fmt::Error> {
        let mut output = String::new();
        self.write_card(
            &mut output,
            ip,
            ThreatLevel::from_abuse(Some(&result.abuse)),
            result.geo.as_ref(),
            Some(&result.abuse),
        )?;
        Ok(output)
    }
}

impl OutputFormatter for StyledFormatter {
    fn format_tab(
        &self,
        tab: TabId,
        records: &[&SightingRecord],
        stats: TabStats,
    ) -> io::Result<String> {
        self.render_tab(tab, records, stats).map_err(io::Error::other)
    }

    fn format_lookup(&self, ip: Ipv4Addr, result: &EnrichmentResult) -> io::Result<String> {
        self.render_lookup(ip, result).map_err(io::Error::other)
    }

    fn mime_type(&self) -> &'static str {
        "text/plain"
    }
}

impl Default for StyledFormatter {
    fn default() -> Self {
        Self::new()
    }
}
